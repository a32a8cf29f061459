use std::{
    future::Future,
    sync::{Arc, Weak},
};

use keel_error::GenericError;

use super::{
    managed::{Inner, ManagedService},
    Id, Name, ServiceError,
};
use crate::lifecycle::SignalSet;

/// The view of a managed service handed to its hooks.
///
/// Gives hooks access to the service's identity and lifecycle signals, and allows spawning background tasks that are
/// owned by the service. A context does not keep the service alive: once every [`ManagedService`] handle is gone,
/// spawning through the context fails.
#[derive(Clone)]
pub struct ServiceContext {
    id: Id,
    name: Name,
    signals: SignalSet,
    service: Weak<Inner>,
}

impl ServiceContext {
    pub(super) fn new(inner: &Arc<Inner>) -> Self {
        Self {
            id: inner.id,
            name: inner.name.clone(),
            signals: inner.signals.clone(),
            service: Arc::downgrade(inner),
        }
    }

    /// Returns the identifier of the service.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the name of the service.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the lifecycle signals of the service.
    pub fn signals(&self) -> &SignalSet {
        &self.signals
    }

    /// Returns `true` if the service has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.signals.should_stop()
    }

    /// Returns `true` if the service has been asked to shut down.
    pub fn should_shutdown(&self) -> bool {
        self.signals.should_shutdown()
    }

    /// Spawns a background task owned by the service.
    ///
    /// The task is expected to run until the stop signal is set, and then return. If the task returns an error, or
    /// panics, before the service has been asked to stop, the service crashes: the error is recorded, the stop signal
    /// is set, and the service is torn down. Tasks are drained when the service stops, and any task still running once
    /// the shutdown timeout expires is aborted.
    ///
    /// # Errors
    ///
    /// If the service has already begun draining its background tasks, or no longer exists, the task is not spawned and
    /// an error is returned.
    pub fn spawn<N, F>(&self, name: N, task: F) -> Result<(), ServiceError>
    where
        N: AsRef<str>,
        F: Future<Output = Result<(), GenericError>> + Send + 'static,
    {
        let task_name = Name::scoped(&self.name, name).unwrap_or_else(|| self.name.clone());
        match self.service.upgrade() {
            Some(inner) => ManagedService::from_inner(inner).spawn_task(task_name, task),
            None => Err(ServiceError::TaskRejected {
                service: self.name.clone(),
                task: task_name,
            }),
        }
    }
}
