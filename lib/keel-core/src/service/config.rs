use std::time::Duration;

use keel_config::{
    deser::{PermissiveBool, PermissiveSeconds},
    GenericConfiguration,
};
use keel_error::GenericError;
use serde::Deserialize;
use serde_with::serde_as;

use super::tree::ChildStartOrder;

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(60)
}

const fn default_false() -> bool {
    false
}

/// Lifecycle configuration for a managed service.
///
/// Can be built programmatically, starting from [`ServiceConfiguration::default`], or deserialized from configuration
/// with the following keys:
///
/// - `shutdown_timeout_secs`: how long each teardown hook, and the drain of background tasks, may take before being
///   forcefully aborted. Defaults to 60 seconds.
/// - `wait_for_shutdown`: whether stopping the service also waits for a shutdown to be requested, and then runs the
///   shutdown hook, before completing. Defaults to `false`.
/// - `child_start_order`: `parent_first` or `children_first`. Defaults to `parent_first`.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServiceConfiguration {
    #[serde_as(as = "PermissiveSeconds")]
    #[serde(rename = "shutdown_timeout_secs", default = "default_shutdown_timeout")]
    shutdown_timeout: Duration,

    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_false")]
    wait_for_shutdown: bool,

    #[serde(default)]
    child_start_order: ChildStartOrder,
}

impl ServiceConfiguration {
    /// Creates a new `ServiceConfiguration` from the given configuration.
    ///
    /// Lifecycle settings are read from the top level of the configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `ServiceConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `ServiceConfiguration` from the given section of the configuration.
    ///
    /// If the section does not exist, the default configuration is returned.
    ///
    /// # Errors
    ///
    /// If the section exists but cannot be deserialized as `ServiceConfiguration`, an error is returned.
    pub fn from_configuration_section(config: &GenericConfiguration, key: &str) -> Result<Self, GenericError> {
        Ok(config.try_get_typed(key)?.unwrap_or_default())
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Sets whether stopping waits for shutdown to be requested.
    pub fn with_wait_for_shutdown(mut self, wait_for_shutdown: bool) -> Self {
        self.wait_for_shutdown = wait_for_shutdown;
        self
    }

    /// Sets the order in which the service and its children are started.
    pub fn with_child_start_order(mut self, child_start_order: ChildStartOrder) -> Self {
        self.child_start_order = child_start_order;
        self
    }

    /// Returns the shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns `true` if stopping waits for shutdown to be requested.
    pub fn wait_for_shutdown(&self) -> bool {
        self.wait_for_shutdown
    }

    /// Returns the order in which the service and its children are started.
    pub fn child_start_order(&self) -> ChildStartOrder {
        self.child_start_order
    }
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            wait_for_shutdown: default_false(),
            child_start_order: ChildStartOrder::default(),
        }
    }
}
