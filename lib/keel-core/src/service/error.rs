use std::{fmt, time::Duration};

use keel_error::SharedError;
use snafu::Snafu;

use super::Name;
use crate::lifecycle::LifecycleState;

/// Result of a lifecycle operation.
pub type ServiceResult = Result<(), ServiceError>;

/// Service lifecycle errors.
///
/// Errors are cheap to clone, so that a single failure can be handed to every caller waiting on the same lifecycle
/// operation, and recorded as the service's crash reason at the same time.
// Hook fields use the full path, since `Hook` names the `ServiceError::Hook` selector in the generated module.
#[derive(Clone, Debug, Snafu)]
#[snafu(module, context(suffix(false)))]
pub enum ServiceError {
    /// The service failed to initialize or start.
    #[snafu(display("Service '{}' failed during {}: {:#}", service, hook, source))]
    Startup {
        /// Name of the service.
        service: Name,

        /// Hook that failed.
        hook: crate::service::Hook,

        /// Error returned by the hook.
        source: SharedError,
    },

    /// A child service failed to start.
    #[snafu(display("Service '{}' failed to start child service '{}': {}", service, child, source))]
    ChildStartup {
        /// Name of the parent service.
        service: Name,

        /// Name of the child service that failed to start.
        child: Name,

        /// Error returned by the child.
        source: Box<ServiceError>,
    },

    /// A teardown hook failed.
    #[snafu(display("Service '{}' failed during {}: {:#}", service, hook, source))]
    Hook {
        /// Name of the service.
        service: Name,

        /// Hook that failed.
        hook: crate::service::Hook,

        /// Error returned by the hook.
        source: SharedError,
    },

    /// A teardown hook, or the drain of background tasks, did not complete within the shutdown timeout.
    #[snafu(display("Service '{}' timed out after {:?} during {}.", service, timeout, hook))]
    ShutdownTimeout {
        /// Name of the service.
        service: Name,

        /// Hook that timed out.
        hook: crate::service::Hook,

        /// Configured shutdown timeout.
        timeout: Duration,
    },

    /// One or more child services failed to stop.
    #[snafu(display("Service '{}' failed to tear down cleanly: {}", service, failures))]
    Teardown {
        /// Name of the service.
        service: Name,

        /// Every failure that occurred during teardown, in the order they occurred.
        failures: TeardownFailures,
    },

    /// An illegal lifecycle transition was attempted.
    #[snafu(display("Service '{}' cannot move from '{}' to '{}'.", service, from, to))]
    IllegalTransition {
        /// Name of the service.
        service: Name,

        /// Current state.
        from: LifecycleState,

        /// Requested state.
        to: LifecycleState,
    },

    /// A background task owned by the service failed.
    #[snafu(display("Service '{}' crashed: background task '{}' failed: {:#}", service, task, source))]
    Crashed {
        /// Name of the service.
        service: Name,

        /// Name of the task that failed.
        task: Name,

        /// Error returned by the task.
        source: SharedError,
    },

    /// A hook or lifecycle task panicked.
    #[snafu(display("Service '{}' panicked during {}.", service, phase))]
    Panicked {
        /// Name of the service.
        service: Name,

        /// Phase during which the panic happened.
        phase: crate::service::Hook,
    },

    /// A lifecycle task was cancelled before completing, typically because its runtime was shut down.
    #[snafu(display("Service '{}' was cancelled during {}.", service, phase))]
    Cancelled {
        /// Name of the service.
        service: Name,

        /// Phase that was cancelled.
        phase: crate::service::Hook,
    },

    /// The child service already belongs to another parent.
    #[snafu(display("Service '{}' already has a parent and cannot be added to '{}'.", child, service))]
    ChildAlreadyOwned {
        /// Name of the would-be parent.
        service: Name,

        /// Name of the child.
        child: Name,
    },

    /// Children can no longer be added because the service has left the `init` state.
    #[snafu(display("Cannot add child '{}' to service '{}' in state '{}'.", child, service, state))]
    ChildrenSealed {
        /// Name of the parent service.
        service: Name,

        /// Name of the child.
        child: Name,

        /// State of the parent service.
        state: LifecycleState,
    },

    /// Adding the child would make the service its own ancestor.
    #[snafu(display("Cannot add '{}' as a child of '{}': it is the service itself or one of its ancestors.", child, service))]
    InvalidChild {
        /// Name of the parent service.
        service: Name,

        /// Name of the child.
        child: Name,
    },

    /// A background task was spawned after the service began tearing down.
    #[snafu(display("Service '{}' is stopping and cannot accept background task '{}'.", service, task))]
    TaskRejected {
        /// Name of the service.
        service: Name,

        /// Name of the rejected task.
        task: Name,
    },
}

impl ServiceError {
    /// Returns the name of the service the error belongs to.
    pub fn service(&self) -> &Name {
        match self {
            Self::Startup { service, .. }
            | Self::ChildStartup { service, .. }
            | Self::Hook { service, .. }
            | Self::ShutdownTimeout { service, .. }
            | Self::Teardown { service, .. }
            | Self::IllegalTransition { service, .. }
            | Self::Crashed { service, .. }
            | Self::Panicked { service, .. }
            | Self::Cancelled { service, .. }
            | Self::ChildAlreadyOwned { service, .. }
            | Self::ChildrenSealed { service, .. }
            | Self::InvalidChild { service, .. }
            | Self::TaskRejected { service, .. } => service,
        }
    }

    /// Returns `true` if the error is, or contains, a shutdown timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ShutdownTimeout { .. } => true,
            Self::ChildStartup { source, .. } => source.is_timeout(),
            Self::Teardown { failures, .. } => failures.iter().any(|failure| failure.error().is_timeout()),
            _ => false,
        }
    }
}

/// A single failure that happened while tearing a service down.
#[derive(Clone, Debug)]
pub struct TeardownFailure {
    service: Name,
    error: ServiceError,
}

impl TeardownFailure {
    pub(crate) fn new(service: Name, error: ServiceError) -> Self {
        Self { service, error }
    }

    /// Returns the name of the service that failed.
    pub fn service(&self) -> &Name {
        &self.service
    }

    /// Returns the error.
    pub fn error(&self) -> &ServiceError {
        &self.error
    }
}

/// The set of failures that happened while tearing a service down.
#[derive(Clone, Debug, Default)]
pub struct TeardownFailures(Vec<TeardownFailure>);

impl TeardownFailures {
    pub(crate) fn push(&mut self, failure: TeardownFailure) {
        self.0.push(failure);
    }

    /// Returns `true` if there were no failures.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of failures.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns an iterator over the failures.
    pub fn iter(&self) -> impl Iterator<Item = &TeardownFailure> {
        self.0.iter()
    }

    /// Returns the names of every service that failed, in the order they failed.
    pub fn services(&self) -> Vec<&str> {
        self.0.iter().map(|failure| &*failure.service).collect()
    }
}

impl fmt::Display for TeardownFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", failure.service, failure.error)?;
        }
        Ok(())
    }
}
