//! Managed services.
//!
//! A managed service is a unit of work with an explicit lifecycle: it is initialized when constructed, started once,
//! runs until asked to stop, and is then stopped (and optionally shut down) exactly once. The behavior of a service is
//! provided by implementing [`Service`], and the lifecycle is driven through a [`ManagedService`] handle.
//!
//! # Trees
//!
//! Services can own child services, added with [`ManagedService::add_child`] before the parent is started. Children
//! are started in the order they were added and stopped in the reverse order, after the parent's own stop hook has run.
//! See [`ChildStartOrder`] for the available start orders.
//!
//! # Hooks and timeouts
//!
//! Every hook runs as its own task on the service's runtime. Teardown hooks (`on_stop` and `on_shutdown`) are bounded
//! by the configured shutdown timeout: the stop and shutdown signals are always set before they run, so a hook is
//! expected to wind down on its own, but a hook that is still running when the timeout expires is aborted and the
//! service crashes.

use std::fmt;

use async_trait::async_trait;
use keel_error::GenericError;

mod config;
pub use self::config::ServiceConfiguration;

mod context;
pub use self::context::ServiceContext;

mod error;
pub use self::error::{ServiceError, ServiceResult, TeardownFailure, TeardownFailures};

mod managed;
pub use self::managed::ManagedService;

mod name;
pub use self::name::{Id, Name};

mod scope;
pub use self::scope::ServiceGuard;

mod telemetry;

mod tree;
pub use self::tree::ChildStartOrder;

/// A lifecycle hook, or another phase of the lifecycle that can fail on its own.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Hook {
    /// [`Service::on_init`].
    Init,

    /// [`Service::on_start`].
    Start,

    /// [`Service::on_started`].
    Started,

    /// [`Service::on_stop`].
    Stop,

    /// [`Service::on_shutdown`].
    Shutdown,

    /// Draining the background tasks spawned through [`ServiceContext::spawn`].
    BackgroundTasks,
}

impl Hook {
    /// Returns the name of the hook.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "on_init",
            Self::Start => "on_start",
            Self::Started => "on_started",
            Self::Stop => "on_stop",
            Self::Shutdown => "on_shutdown",
            Self::BackgroundTasks => "background_tasks",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The behavior of a managed service.
///
/// Every hook has a default, no-op implementation, so a service only implements the hooks it cares about. Hooks are
/// never retried: an error returned from any hook is recorded, crashes the service, and is returned to whoever drove
/// the lifecycle operation.
///
/// The type is consumed as `Arc<dyn Service>`, and hooks take `&self`, so any state a service mutates over its lifetime
/// must use interior mutability.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Returns the name of the service.
    ///
    /// The name is sanitized before being used in logs, metrics, and errors.
    fn name(&self) -> &str;

    /// Initializes the service.
    ///
    /// Called exactly once, synchronously, when the service is wrapped in a [`ManagedService`].
    ///
    /// # Errors
    ///
    /// If an error is returned, the service crashes immediately, and the error is returned from
    /// [`ManagedService::start`].
    fn on_init(&self) -> Result<(), GenericError> {
        Ok(())
    }

    /// Starts the service.
    ///
    /// Long-running work should not be performed inline, but spawned with [`ServiceContext::spawn`] so that it is
    /// owned, and torn down, by the service.
    ///
    /// # Errors
    ///
    /// If an error is returned, the service crashes, and the error is returned to every caller of
    /// [`ManagedService::start`].
    async fn on_start(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        Ok(())
    }

    /// Called once the service and all of its children have started.
    ///
    /// # Errors
    ///
    /// If an error is returned, the service crashes, and the error is returned to every caller of
    /// [`ManagedService::start`].
    async fn on_started(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        Ok(())
    }

    /// Stops the service.
    ///
    /// Runs before any child service is stopped, and is bounded by the shutdown timeout.
    ///
    /// # Errors
    ///
    /// If an error is returned, the service crashes, and the error is returned to every caller of
    /// [`ManagedService::stop`].
    async fn on_stop(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        Ok(())
    }

    /// Shuts the service down.
    ///
    /// Only runs when a shutdown was requested, after the service and its children have stopped, and is bounded by the
    /// shutdown timeout.
    ///
    /// # Errors
    ///
    /// If an error is returned, the service crashes, and the error is returned to every caller of
    /// [`ManagedService::stop`].
    async fn on_shutdown(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        Ok(())
    }
}
