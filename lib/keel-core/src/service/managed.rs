use std::{
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak,
    },
    time::Duration,
};

use futures::future::{self, BoxFuture, FutureExt as _};
use keel_error::{GenericError, SharedError};
use tokio::{
    runtime::Handle,
    sync::watch,
    task::{JoinError, JoinSet},
};
use tracing::{debug, debug_span, error, info, warn, Instrument as _, Span};

use super::{
    telemetry, tree, Hook, Id, Name, Service, ServiceConfiguration, ServiceContext, ServiceError, ServiceResult,
    TeardownFailure, TeardownFailures,
};
use crate::lifecycle::{Flight, LifecycleState, SignalSet};

type HookFuture = BoxFuture<'static, Result<(), GenericError>>;
pub(super) type LifecycleFuture = BoxFuture<'static, ServiceResult>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing panics while holding these locks, but a poisoned lock still holds consistent data, so just take it.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Flights {
    start: Option<Flight<ServiceResult>>,
    stop: Option<Flight<ServiceResult>>,
}

pub(super) struct Inner {
    pub(super) id: Id,
    pub(super) name: Name,
    pub(super) signals: SignalSet,
    service: Arc<dyn Service>,
    config: ServiceConfiguration,
    runtime: Handle,
    state: watch::Sender<LifecycleState>,

    // Guards every decision to begin a lifecycle phase: the state is always read and advanced out of `init` and
    // `running` while holding this lock.
    flights: Mutex<Flights>,
    children: Mutex<Vec<ManagedService>>,
    parent: OnceLock<Weak<Inner>>,
    crash_reason: Mutex<Option<ServiceError>>,
    started: AtomicBool,

    // `None` once the background tasks have been drained.
    tasks: Mutex<Option<JoinSet<()>>>,
}

/// A handle to a managed service.
///
/// `ManagedService` drives a [`Service`] through its lifecycle, and is the only way to start, stop, or shut a service
/// down. Handles are cheap to clone, and every clone refers to the same service, so a service can be started by one
/// task and stopped by another.
///
/// # Idempotency
///
/// Starting and stopping are single-flight: the first caller spawns the phase as a task on the service's runtime, and
/// every concurrent or later caller waits for that same task and observes the same outcome. Hooks therefore run at most
/// once, no matter how many callers there are, and a phase always runs to completion even if the caller that triggered
/// it is cancelled.
///
/// # Stopping
///
/// Stopping a running service:
///
/// 1. sets the stop signal, and waits for any in-flight start to finish
/// 2. runs `on_stop`, bounded by the shutdown timeout
/// 3. stops every child, in the reverse of the order they were added
/// 4. drains background tasks, bounded by the shutdown timeout
/// 5. if configured to wait for shutdown, waits for the shutdown signal
/// 6. if shutdown was requested, runs `on_shutdown`, bounded by the shutdown timeout, and moves to `shutdown`;
///    otherwise moves to `stopped`
///
/// Every step runs even if an earlier one failed, except for the last two: a service whose teardown failed moves to
/// `crashed` instead, and the failures are reported together.
#[derive(Clone)]
pub struct ManagedService {
    inner: Arc<Inner>,
}

impl ManagedService {
    /// Creates a new `ManagedService` that runs its lifecycle on the given runtime.
    ///
    /// `on_init` is called before this returns. If it fails, the service is returned in the `crashed` state, and the
    /// error is returned from [`start`][Self::start] and [`crash_reason`][Self::crash_reason].
    pub fn new<S>(service: S, config: ServiceConfiguration, runtime: Handle) -> Self
    where
        S: Service,
    {
        Self::from_arc(Arc::new(service), config, runtime)
    }

    /// Creates a new `ManagedService` from a shared service, running its lifecycle on the given runtime.
    pub fn from_arc(service: Arc<dyn Service>, config: ServiceConfiguration, runtime: Handle) -> Self {
        let name = Name::root(service.name()).unwrap_or_else(Name::unnamed);
        let (state, _) = watch::channel(LifecycleState::Init);

        let managed = Self {
            inner: Arc::new(Inner {
                id: Id::new(),
                name,
                signals: SignalSet::new(),
                service,
                config,
                runtime,
                state,
                flights: Mutex::new(Flights::default()),
                children: Mutex::new(Vec::new()),
                parent: OnceLock::new(),
                crash_reason: Mutex::new(None),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Some(JoinSet::new())),
            }),
        };
        managed.initialize();
        managed
    }

    /// Creates a new `ManagedService` that runs its lifecycle on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_current_runtime<S>(service: S, config: ServiceConfiguration) -> Self
    where
        S: Service,
    {
        Self::new(service, config, Handle::current())
    }

    pub(super) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Returns the identifier of the service.
    pub fn id(&self) -> Id {
        self.inner.id
    }

    /// Returns the sanitized name of the service.
    pub fn name(&self) -> &Name {
        &self.inner.name
    }

    /// Returns the lifecycle configuration of the service.
    pub fn config(&self) -> &ServiceConfiguration {
        &self.inner.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Returns `true` once the service has finished starting successfully.
    ///
    /// Stays `true` after the service is stopped.
    pub fn started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Returns `true` if the service has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.inner.signals.should_stop()
    }

    /// Returns `true` if the service has been asked to shut down.
    pub fn should_shutdown(&self) -> bool {
        self.inner.signals.should_shutdown()
    }

    /// Returns the lifecycle signals of the service.
    pub fn signals(&self) -> SignalSet {
        self.inner.signals.clone()
    }

    /// Returns the first unrecovered error the service encountered, if any.
    pub fn crash_reason(&self) -> Option<ServiceError> {
        lock(&self.inner.crash_reason).clone()
    }

    /// Returns the child services, in the order they were added.
    pub fn children(&self) -> Vec<ManagedService> {
        lock(&self.inner.children).clone()
    }

    /// Waits until the service reaches a terminal state, and returns it.
    pub async fn wait_until_terminal(&self) -> LifecycleState {
        let mut state_rx = self.inner.state.subscribe();
        let terminal = state_rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);

        // The sender lives as long as we do, so the channel can't close while we wait on it.
        terminal.unwrap_or_else(|_| self.state())
    }

    /// Adds a child service.
    ///
    /// The child is started along with this service, and stopped after this service's `on_stop` hook has run.
    ///
    /// # Errors
    ///
    /// If this service has already left the `init` state, if the child already belongs to another service, or if the
    /// child is this service or one of its ancestors, an error is returned.
    pub fn add_child(&self, child: ManagedService) -> ServiceResult {
        if self.is_self_or_ancestor(&child) {
            return Err(ServiceError::InvalidChild {
                service: self.inner.name.clone(),
                child: child.inner.name.clone(),
            });
        }

        // Holding the flights lock keeps a concurrent `start` from sealing the children while we add to them.
        let _flights = lock(&self.inner.flights);
        let state = self.state();
        if state != LifecycleState::Init {
            return Err(ServiceError::ChildrenSealed {
                service: self.inner.name.clone(),
                child: child.inner.name.clone(),
                state,
            });
        }

        if child.inner.parent.set(Arc::downgrade(&self.inner)).is_err() {
            return Err(ServiceError::ChildAlreadyOwned {
                service: self.inner.name.clone(),
                child: child.inner.name.clone(),
            });
        }

        let mut children = lock(&self.inner.children);
        debug!(
            service_name = %self.inner.name,
            child_name = %child.inner.name,
            "Adding child service #{}.",
            children.len(),
        );
        children.push(child);
        Ok(())
    }

    fn is_self_or_ancestor(&self, candidate: &ManagedService) -> bool {
        let mut current = Some(Arc::clone(&self.inner));
        while let Some(inner) = current {
            if Arc::ptr_eq(&inner, &candidate.inner) {
                return true;
            }
            current = inner.parent.get().and_then(Weak::upgrade);
        }
        false
    }

    /// Starts the service.
    ///
    /// Runs `on_start`, starts every child, and runs `on_started`, and then moves the service to `running`. The order
    /// of the first two steps depends on the configured [`ChildStartOrder`][super::ChildStartOrder].
    ///
    /// Only the first call starts the service. Concurrent callers wait for that start to complete and observe the same
    /// outcome, and calls made once the service has left `init` return immediately.
    ///
    /// # Errors
    ///
    /// If a hook or a child fails, the children that were started are stopped again, the service crashes, and the error
    /// is returned to every caller. If `on_init` failed when the service was created, that error is returned.
    pub async fn start(&self) -> ServiceResult {
        self.start_future().await
    }

    // Lifecycle operations used from within other lifecycle tasks go through these named futures, rather than the
    // `async fn` wrappers, so that a parent's lifecycle future never contains a child's opaque lifecycle future.
    pub(super) fn start_future(&self) -> LifecycleFuture {
        let mut flights = lock(&self.inner.flights);
        if let Some(flight) = &flights.start {
            return flight.wait().boxed();
        }

        match self.state() {
            LifecycleState::Init => {
                if let Err(e) = self.transition(LifecycleState::Starting) {
                    return future::ready(Err(e)).boxed();
                }

                let service = self.clone();
                let flight = Flight::spawn(
                    &self.inner.runtime,
                    async move { service.run_start().await }.instrument(self.span()),
                    self.join_error_handler(Hook::Start),
                );
                flights.start = Some(flight.clone());
                flight.wait().boxed()
            }
            LifecycleState::Crashed => future::ready(self.crash_reason().map_or(Ok(()), Err)).boxed(),
            _ => future::ready(Ok(())).boxed(),
        }
    }

    /// Starts the service if it has not been started yet.
    ///
    /// # Errors
    ///
    /// If the service was in `init` and failed to start, an error is returned.
    pub async fn maybe_start(&self) -> ServiceResult {
        if self.state() == LifecycleState::Init {
            self.start().await
        } else {
            Ok(())
        }
    }

    /// Stops the service.
    ///
    /// Sets the stop signal, and then tears the service down. Only the first call tears the service down: concurrent
    /// callers wait for that teardown to complete and observe the same outcome. A service that was never started moves
    /// straight to `stopped`, without running any hooks. Stopping a service that crashed while starting does nothing.
    ///
    /// If the service is configured to wait for shutdown, this only returns once a shutdown has been requested and the
    /// service has shut down.
    ///
    /// # Errors
    ///
    /// If a hook fails or times out, a child fails to stop, or background tasks fail to drain in time, the service
    /// crashes and the error is returned. If a background task crashed the service, that error is returned.
    pub async fn stop(&self) -> ServiceResult {
        self.stop_future().await
    }

    pub(super) fn stop_future(&self) -> LifecycleFuture {
        self.inner.signals.set_stop();

        let mut flights = lock(&self.inner.flights);
        match self.ensure_stop_flight(&mut flights) {
            Some(flight) => flight.wait().boxed(),
            None => future::ready(Ok(())).boxed(),
        }
    }

    /// Shuts the service down.
    ///
    /// Equivalent to calling [`set_shutdown`][Self::set_shutdown] and then waiting on [`stop`][Self::stop].
    ///
    /// # Errors
    ///
    /// If the service fails to tear down, an error is returned.
    pub async fn shutdown(&self) -> ServiceResult {
        self.shutdown_future().await
    }

    pub(super) fn shutdown_future(&self) -> LifecycleFuture {
        self.set_shutdown();
        self.stop_future()
    }

    /// Requests a shutdown without waiting for it.
    ///
    /// Sets the shutdown and stop signals, and schedules the teardown of the service on its runtime if it is not
    /// already in progress. Can be called from synchronous code, including signal handlers and `Drop` implementations.
    pub fn set_shutdown(&self) {
        self.inner.signals.set_shutdown();

        let mut flights = lock(&self.inner.flights);
        let _ = self.ensure_stop_flight(&mut flights);
    }

    /// Requests a stop without waiting for it.
    pub(super) fn request_stop(&self) {
        self.inner.signals.set_stop();

        let mut flights = lock(&self.inner.flights);
        let _ = self.ensure_stop_flight(&mut flights);
    }

    fn ensure_stop_flight(&self, flights: &mut Flights) -> Option<Flight<ServiceResult>> {
        if let Some(flight) = &flights.stop {
            return Some(flight.clone());
        }

        match self.state() {
            LifecycleState::Init => {
                // Nothing ever started, so there is nothing to tear down: children are moved along with us.
                if self.transition(LifecycleState::Stopped).is_ok() {
                    info!(service_name = %self.inner.name, "Service stopped before it was started.");
                }
                for child in lock(&self.inner.children).iter().rev() {
                    child.request_stop();
                }
                None
            }
            LifecycleState::Starting | LifecycleState::Running => {
                let start = flights.start.clone();
                let service = self.clone();
                let flight = Flight::spawn(
                    &self.inner.runtime,
                    async move { service.run_stop(start).await }.instrument(self.span()),
                    self.join_error_handler(Hook::Stop),
                );
                flights.stop = Some(flight.clone());
                Some(flight)
            }
            _ => None,
        }
    }

    async fn run_start(self) -> ServiceResult {
        debug!("Starting service.");

        let context = ServiceContext::new(&self.inner);
        let children = self.children();
        let result = match self.run_start_sequence(&context, &children).await {
            Ok(()) => self.mark_running(),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(service_name = %self.inner.name, "Service started.");
                Ok(())
            }
            Err(e) => Err(self.fail_start(e, &children).await),
        }
    }

    async fn run_start_sequence(&self, context: &ServiceContext, children: &[ManagedService]) -> ServiceResult {
        match self.inner.config.child_start_order() {
            tree::ChildStartOrder::ParentFirst => {
                self.run_hook(Hook::Start, context, None, |service, context| {
                    async move { service.on_start(&context).await }.boxed()
                })
                .await?;
                tree::start_children(&self.inner.name, children).await?;
            }
            tree::ChildStartOrder::ChildrenFirst => {
                tree::start_children(&self.inner.name, children).await?;
                self.run_hook(Hook::Start, context, None, |service, context| {
                    async move { service.on_start(&context).await }.boxed()
                })
                .await?;
            }
        }

        self.run_hook(Hook::Started, context, None, |service, context| {
            async move { service.on_started(&context).await }.boxed()
        })
        .await
    }

    fn mark_running(&self) -> ServiceResult {
        // A background task may have crashed the service while it was starting, which is only recorded, and not acted
        // upon, until the start sequence completes. Checking under the flights lock means that a task failing from here
        // on sees the service as running, and tears it down itself.
        let _flights = lock(&self.inner.flights);
        if let Some(reason) = self.crash_reason() {
            return Err(reason);
        }

        self.transition(LifecycleState::Running)?;
        self.inner.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn fail_start(&self, error: ServiceError, children: &[ManagedService]) -> ServiceError {
        error!(service_name = %self.inner.name, error = %error, "Service failed to start.");
        self.record_crash_reason(&error);
        self.inner.signals.set_stop();

        // Undo whatever part of the start sequence completed.
        let mut failures = TeardownFailures::default();
        tree::stop_children(children, false, &mut failures).await;
        if !failures.is_empty() {
            warn!(service_name = %self.inner.name, %failures, "Failed to stop children of service that failed to start.");
        }
        if let Err(e) = self.drain_tasks().await {
            warn!(service_name = %self.inner.name, error = %e, "Failed to drain background tasks of service that failed to start.");
        }

        self.crash(error)
    }

    async fn run_stop(self, start: Option<Flight<ServiceResult>>) -> ServiceResult {
        // Never tear down while a start is in progress: wait for it, whatever its outcome.
        if let Some(start) = start {
            let _ = start.wait().await;
        }

        // A failed start already cleaned up after itself.
        if self.state() != LifecycleState::Running {
            return Ok(());
        }

        self.transition(LifecycleState::Stopping)?;
        debug!("Stopping service.");

        let context = ServiceContext::new(&self.inner);
        let shutdown_timeout = self.inner.config.shutdown_timeout();
        let mut own_failures = Vec::new();
        let mut child_failures = TeardownFailures::default();

        if let Err(e) = self
            .run_hook(Hook::Stop, &context, Some(shutdown_timeout), |service, context| {
                async move { service.on_stop(&context).await }.boxed()
            })
            .await
        {
            own_failures.push(e);
        }

        let children = self.children();
        tree::stop_children(&children, self.inner.signals.should_shutdown(), &mut child_failures).await;

        if let Err(e) = self.drain_tasks().await {
            own_failures.push(e);
        }

        if let Some(error) = self.teardown_error(own_failures, child_failures) {
            return Err(self.crash(error));
        }

        // Torn down because a background task crashed the service.
        if let Some(reason) = self.crash_reason() {
            return Err(self.crash(reason));
        }

        if self.inner.config.wait_for_shutdown() && !self.inner.signals.should_shutdown() {
            debug!("Service stopped, waiting for shutdown.");
            self.inner.signals.wait_for_shutdown().await;
        }

        if self.inner.signals.should_shutdown() {
            if let Err(e) = self
                .run_hook(Hook::Shutdown, &context, Some(shutdown_timeout), |service, context| {
                    async move { service.on_shutdown(&context).await }.boxed()
                })
                .await
            {
                return Err(self.crash(e));
            }

            self.transition(LifecycleState::Shutdown)?;
            info!(service_name = %self.inner.name, "Service shut down.");
        } else {
            self.transition(LifecycleState::Stopped)?;
            info!(service_name = %self.inner.name, "Service stopped.");
        }

        Ok(())
    }

    fn teardown_error(
        &self, mut own_failures: Vec<ServiceError>, child_failures: TeardownFailures,
    ) -> Option<ServiceError> {
        if child_failures.is_empty() && own_failures.len() <= 1 {
            return own_failures.pop();
        }

        let mut failures = TeardownFailures::default();
        for error in own_failures {
            failures.push(TeardownFailure::new(self.inner.name.clone(), error));
        }
        for failure in child_failures.iter() {
            failures.push(failure.clone());
        }

        Some(ServiceError::Teardown {
            service: self.inner.name.clone(),
            failures,
        })
    }

    async fn run_hook<F>(
        &self, hook: Hook, context: &ServiceContext, deadline: Option<Duration>, make_hook: F,
    ) -> ServiceResult
    where
        F: FnOnce(Arc<dyn Service>, ServiceContext) -> HookFuture,
    {
        debug!(hook = %hook, "Running hook.");

        let hook_future = make_hook(Arc::clone(&self.inner.service), context.clone());
        let mut task = self.inner.runtime.spawn(hook_future.in_current_span());

        let result = match deadline {
            None => (&mut task).await,
            Some(timeout) => match tokio::time::timeout(timeout, &mut task).await {
                Ok(result) => result,
                Err(_) => {
                    // Signals are already set, so the hook had its chance to return on its own.
                    task.abort();
                    warn!(service_name = %self.inner.name, hook = %hook, ?timeout, "Hook did not complete within the shutdown timeout. Aborting.");
                    telemetry::record_hook_timeout(&self.inner.name, hook);
                    return Err(ServiceError::ShutdownTimeout {
                        service: self.inner.name.clone(),
                        hook,
                        timeout,
                    });
                }
            },
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let source = SharedError::new(e);
                let service = self.inner.name.clone();
                Err(match hook {
                    Hook::Init | Hook::Start | Hook::Started => ServiceError::Startup { service, hook, source },
                    Hook::Stop | Hook::Shutdown | Hook::BackgroundTasks => ServiceError::Hook { service, hook, source },
                })
            }
            Err(e) => Err(join_error(self.inner.name.clone(), hook, e)),
        }
    }

    fn initialize(&self) {
        let service = Arc::clone(&self.inner.service);
        let error = match std::panic::catch_unwind(AssertUnwindSafe(|| service.on_init())) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => ServiceError::Startup {
                service: self.inner.name.clone(),
                hook: Hook::Init,
                source: SharedError::new(e),
            },
            Err(_) => ServiceError::Panicked {
                service: self.inner.name.clone(),
                phase: Hook::Init,
            },
        };

        error!(service_name = %self.inner.name, error = %error, "Service failed to initialize.");
        let _ = self.crash(error);
    }

    pub(super) fn spawn_task<F>(&self, task_name: Name, task: F) -> ServiceResult
    where
        F: Future<Output = Result<(), GenericError>> + Send + 'static,
    {
        let mut tasks = lock(&self.inner.tasks);
        let Some(tasks) = tasks.as_mut() else {
            return Err(ServiceError::TaskRejected {
                service: self.inner.name.clone(),
                task: task_name,
            });
        };

        debug!(task_name = %task_name, "Spawning background task.");

        let service = Arc::downgrade(&self.inner);
        let span = debug_span!("task", task_name = %task_name);
        tasks.spawn_on(
            async move {
                let error = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(Ok(())) => {
                        debug!("Background task completed.");
                        return;
                    }
                    Ok(Err(e)) => SharedError::new(e),
                    Err(_) => SharedError::msg("background task panicked"),
                };

                if let Some(inner) = service.upgrade() {
                    ManagedService::from_inner(inner).on_task_failure(task_name, error);
                }
            }
            .instrument(span),
            &self.inner.runtime,
        );
        Ok(())
    }

    fn on_task_failure(&self, task: Name, source: SharedError) {
        if self.inner.signals.should_stop() {
            warn!(service_name = %self.inner.name, task_name = %task, error = %source, "Background task failed while service was stopping.");
            return;
        }

        error!(service_name = %self.inner.name, task_name = %task, error = %source, "Background task failed. Crashing service.");

        let mut flights = lock(&self.inner.flights);
        self.record_crash_reason(&ServiceError::Crashed {
            service: self.inner.name.clone(),
            task,
            source,
        });
        self.inner.signals.set_stop();

        // A service that is still starting fails its start once the start sequence completes.
        if self.state() == LifecycleState::Running {
            let _ = self.ensure_stop_flight(&mut flights);
        }
    }

    async fn drain_tasks(&self) -> ServiceResult {
        let tasks = lock(&self.inner.tasks).take();
        let Some(mut tasks) = tasks else {
            return Ok(());
        };
        if tasks.is_empty() {
            return Ok(());
        }

        debug!(tasks = tasks.len(), "Draining background tasks.");

        let timeout = self.inner.config.shutdown_timeout();
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(service_name = %self.inner.name, remaining = tasks.len(), ?timeout, "Background tasks did not complete within the shutdown timeout. Aborting.");
            telemetry::record_hook_timeout(&self.inner.name, Hook::BackgroundTasks);
            tasks.shutdown().await;
            return Err(ServiceError::ShutdownTimeout {
                service: self.inner.name.clone(),
                hook: Hook::BackgroundTasks,
                timeout,
            });
        }

        Ok(())
    }

    fn transition(&self, next: LifecycleState) -> ServiceResult {
        let mut illegal = None;
        self.inner
            .state
            .send_if_modified(|current| match current.transition_to(next) {
                Ok(next) => {
                    *current = next;
                    true
                }
                Err(e) => {
                    illegal = Some(e);
                    false
                }
            });

        if let Some(e) = illegal {
            warn!(service_name = %self.inner.name, from = %e.from, to = %e.to, "Rejected illegal lifecycle transition.");
            return Err(ServiceError::IllegalTransition {
                service: self.inner.name.clone(),
                from: e.from,
                to: e.to,
            });
        }

        debug!(service_name = %self.inner.name, service_id = self.inner.id.as_usize(), state = %next, "Service changed state.");
        telemetry::record_transition(&self.inner.name, next);
        Ok(())
    }

    fn record_crash_reason(&self, error: &ServiceError) {
        let mut crash_reason = lock(&self.inner.crash_reason);
        if crash_reason.is_none() {
            *crash_reason = Some(error.clone());
        }
    }

    /// Records the error, sets the stop signal, and moves the service to `crashed`.
    fn crash(&self, error: ServiceError) -> ServiceError {
        self.record_crash_reason(&error);
        self.inner.signals.set_stop();

        if !self.state().is_terminal() && self.transition(LifecycleState::Crashed).is_ok() {
            error!(service_name = %self.inner.name, error = %error, "Service crashed.");
        }
        error
    }

    fn join_error_handler(&self, phase: Hook) -> impl FnOnce(JoinError) -> ServiceResult + Send + 'static {
        // Weak, since the handler lives inside the flight stored in the service itself.
        let service = Arc::downgrade(&self.inner);
        let name = self.inner.name.clone();
        move |e| {
            let error = join_error(name, phase, e);
            match service.upgrade() {
                Some(inner) => Err(ManagedService::from_inner(inner).crash(error)),
                None => Err(error),
            }
        }
    }

    fn span(&self) -> Span {
        debug_span!(
            "service",
            service_id = self.inner.id.as_usize(),
            service_name = %self.inner.name,
        )
    }
}

impl fmt::Debug for ManagedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedService")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

fn join_error(service: Name, phase: Hook, e: JoinError) -> ServiceError {
    if e.is_panic() {
        ServiceError::Panicked { service, phase }
    } else {
        ServiceError::Cancelled { service, phase }
    }
}
