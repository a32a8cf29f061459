use std::{future::Future, ops::Deref, panic::AssertUnwindSafe};

use futures::FutureExt as _;
use keel_error::GenericError;
use tracing::{debug, warn};

use super::{ManagedService, ServiceError, ServiceResult};

impl ManagedService {
    /// Runs `body` with the service started, stopping the service once `body` completes.
    ///
    /// The service is started, `body` is run, and then the service is stopped, no matter how `body` exits: returning
    /// successfully, returning an error, or panicking. A panic is resumed once the service has been stopped. If the
    /// returned future is dropped before it completes, a stop is scheduled in the background.
    ///
    /// # Errors
    ///
    /// If the service fails to start, `body` is not run and the start error is returned. If `body` returns an error, it
    /// is returned once the service has been stopped, and any error from stopping the service is logged. Otherwise, any
    /// error from stopping the service is returned.
    pub async fn scoped<F, Fut, T>(&self, body: F) -> Result<T, GenericError>
    where
        F: FnOnce(ManagedService) -> Fut,
        Fut: Future<Output = Result<T, GenericError>>,
    {
        let guard = self.acquire().await?;
        let outcome = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
        let stopped = guard.release().await;

        match outcome {
            Ok(Ok(value)) => {
                stopped?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(stop_error) = stopped {
                    warn!(service_name = %self.name(), error = %stop_error, "Failed to stop service after scope returned an error.");
                }
                Err(e)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Starts the service, returning a guard that stops it again.
    ///
    /// The guard should be released with [`ServiceGuard::release`], which waits for the service to stop. If the guard
    /// is dropped instead, for example because the task holding it was cancelled, a stop is scheduled in the
    /// background.
    ///
    /// # Errors
    ///
    /// If the service fails to start, an error is returned and no guard is created.
    pub async fn acquire(&self) -> Result<ServiceGuard, ServiceError> {
        self.start().await?;
        Ok(ServiceGuard {
            service: Some(self.clone()),
        })
    }
}

/// A started service that is stopped when the guard is released or dropped.
///
/// Created by [`ManagedService::acquire`].
#[derive(Debug)]
pub struct ServiceGuard {
    service: Option<ManagedService>,
}

impl ServiceGuard {
    /// Stops the service, waiting for it to stop.
    ///
    /// # Errors
    ///
    /// If the service fails to stop, an error is returned.
    pub async fn release(mut self) -> ServiceResult {
        match self.service.take() {
            Some(service) => service.stop().await,
            None => Ok(()),
        }
    }
}

impl Deref for ServiceGuard {
    type Target = ManagedService;

    fn deref(&self) -> &Self::Target {
        match &self.service {
            Some(service) => service,
            None => unreachable!("service is only taken when the guard is released"),
        }
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            debug!(service_name = %service.name(), "Service guard dropped without being released. Scheduling stop.");
            service.request_stop();
        }
    }
}
