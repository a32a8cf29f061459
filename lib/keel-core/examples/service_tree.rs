use std::time::Duration;

use async_trait::async_trait;
use keel_core::service::{ManagedService, Service, ServiceConfiguration, ServiceContext};
use keel_error::{generic_error, GenericError};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), GenericError> {
    tracing_subscriber::fmt::fmt()
        .with_ansi(true)
        .compact()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Build a small service tree: a root service with an API server and a telemetry service underneath it, and a
    // flusher underneath the telemetry service.
    //
    // The telemetry collector fails after a few seconds, which crashes the telemetry service and stops its flusher. The
    // root keeps running, since a child crashing never takes its parent down with it, but the failure is reported once
    // the tree is shut down. The flusher takes a moment to stop, which shows up as a delay when telemetry crashes.
    let config = ServiceConfiguration::default().with_shutdown_timeout(Duration::from_secs(5));

    let root = ManagedService::with_current_runtime(MockService::idle("root"), config.clone());
    let api = ManagedService::with_current_runtime(MockService::idle("admin-api"), config.clone());
    let telemetry = ManagedService::with_current_runtime(
        MockService::failure("telemetry", "collector lost its connection", Duration::from_secs(3)),
        config.clone(),
    );
    let flusher = ManagedService::with_current_runtime(
        MockService::idle("telemetry-flusher").with_stop_delay(Duration::from_secs(1)),
        config,
    );

    telemetry.add_child(flusher)?;
    root.add_child(api)?;
    root.add_child(telemetry.clone())?;

    root.start().await?;
    info!("Service tree started.");

    let run_time = Duration::from_secs(6);
    info!("Running for {:?} before shutting down...", run_time);
    tokio::time::sleep(run_time).await;

    if let Some(reason) = telemetry.crash_reason() {
        info!(state = %telemetry.state(), "Telemetry service crashed: {}", reason);
    }

    info!("Shutting down...");
    match root.shutdown().await {
        Ok(()) => info!(state = %root.state(), "Service tree shut down."),
        Err(e) => error!(state = %root.state(), "Service tree failed to shut down: {}", e),
    }

    Ok(())
}

struct MockService {
    name: &'static str,
    failure: Option<(&'static str, Duration)>,
    stop_delay: Option<Duration>,
}

impl MockService {
    /// Creates a service whose background task runs until it is asked to stop.
    fn idle(name: &'static str) -> Self {
        Self {
            name,
            failure: None,
            stop_delay: None,
        }
    }

    /// Creates a service whose background task fails after the given delay.
    fn failure(name: &'static str, msg: &'static str, delay: Duration) -> Self {
        Self {
            name,
            failure: Some((msg, delay)),
            stop_delay: None,
        }
    }

    /// Sets how long the service takes to stop.
    fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }
}

#[async_trait]
impl Service for MockService {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_start(&self, context: &ServiceContext) -> Result<(), GenericError> {
        let stopped = context.signals().stop_signal().wait_owned();
        let failure = self.failure;

        context.spawn("work", async move {
            match failure {
                Some((msg, delay)) => tokio::select! {
                    _ = stopped => Ok(()),
                    _ = tokio::time::sleep(delay) => Err(generic_error!(msg)),
                },
                None => {
                    stopped.await;
                    Ok(())
                }
            }
        })?;

        info!(service_name = %context.name(), "Service started.");
        Ok(())
    }

    async fn on_stop(&self, context: &ServiceContext) -> Result<(), GenericError> {
        if let Some(delay) = self.stop_delay {
            info!(service_name = %context.name(), "Waiting {:?} for in-flight work to complete...", delay);
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn on_shutdown(&self, context: &ServiceContext) -> Result<(), GenericError> {
        info!(service_name = %context.name(), "Releasing resources.");
        Ok(())
    }
}
