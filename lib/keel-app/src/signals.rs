//! Process termination signals.
//!
//! The service runtime never installs signal handlers on its own. These helpers connect the usual termination signals,
//! or any other trigger, to the shutdown of a managed service.

use std::{fmt, future::Future};

use keel_core::service::ManagedService;
use keel_error::{ErrorContext as _, GenericError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A signal asking the process to terminate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminationSignal {
    /// `SIGINT`, or Ctrl-C.
    Interrupt,

    /// `SIGTERM`.
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Registered handlers for the termination signals.
///
/// Handlers are registered when this is created, so signals received between creating it and waiting on it are not
/// lost.
pub struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Registers handlers for the termination signals.
    ///
    /// # Errors
    ///
    /// If the signal handlers cannot be registered, an error is returned.
    #[cfg(unix)]
    pub fn register() -> Result<Self, GenericError> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt()).error_context("Failed to set up SIGINT handler.")?;
        let terminate = signal(SignalKind::terminate()).error_context("Failed to set up SIGTERM handler.")?;
        Ok(Self { interrupt, terminate })
    }

    /// Registers handlers for the termination signals.
    ///
    /// # Errors
    ///
    /// If the signal handlers cannot be registered, an error is returned.
    #[cfg(not(unix))]
    pub fn register() -> Result<Self, GenericError> {
        Ok(Self {})
    }

    /// Waits for the next termination signal.
    ///
    /// # Errors
    ///
    /// If the signal handlers stop delivering signals, an error is returned.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Result<TerminationSignal, GenericError> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| TerminationSignal::Interrupt),
            received = self.terminate.recv() => received.map(|()| TerminationSignal::Terminate),
        }
        .ok_or_else(|| keel_error::generic_error!("Signal handlers were unregistered."))
    }

    /// Waits for the next termination signal.
    ///
    /// # Errors
    ///
    /// If the Ctrl-C handler cannot be registered, an error is returned.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Result<TerminationSignal, GenericError> {
        tokio::signal::ctrl_c()
            .await
            .error_context("Failed to listen for Ctrl-C.")?;
        Ok(TerminationSignal::Interrupt)
    }
}

/// Waits until the process receives a termination signal.
///
/// Listens for Ctrl-C everywhere, and for `SIGTERM` on Unix platforms.
///
/// # Errors
///
/// If the signal handlers cannot be registered, an error is returned.
pub async fn wait_for_termination_signal() -> Result<TerminationSignal, GenericError> {
    TerminationSignals::register()?.recv().await
}

/// Requests the shutdown of `service` once `trigger` resolves.
///
/// The trigger is awaited in a background task, and the returned handle completes once shutdown has been requested,
/// either by the trigger or by anything else. Shutdown is only requested, not awaited: wait on the service itself, for
/// example with [`ManagedService::wait_until_terminal`], to know when it has completed.
pub fn shutdown_on<F>(trigger: F, service: &ManagedService) -> JoinHandle<()>
where
    F: Future + Send + 'static,
{
    let service = service.clone();
    let shutdown_requested = service.signals().shutdown_signal().wait_owned();
    tokio::spawn(async move {
        tokio::select! {
            _ = trigger => {
                info!(service_name = %service.name(), "Shutdown triggered.");
                service.set_shutdown();
            }
            _ = shutdown_requested => {
                debug!(service_name = %service.name(), "Shutdown already requested. Dropping trigger.");
            }
        }
    })
}

/// Requests the shutdown of `service` once the process receives a termination signal.
///
/// # Errors
///
/// If the signal handlers cannot be registered, an error is returned.
pub fn shutdown_on_termination_signal(service: &ManagedService) -> Result<JoinHandle<()>, GenericError> {
    let mut signals = TerminationSignals::register()?;
    Ok(shutdown_on(
        async move {
            match signals.recv().await {
                Ok(signal) => info!("Received {}, shutting down...", signal),
                Err(e) => tracing::error!(error = %e, "Failed to wait for termination signal. Shutting down."),
            }
        },
        service,
    ))
}
