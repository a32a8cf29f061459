use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use keel_core::{
    lifecycle::LifecycleState,
    service::{
        ChildStartOrder, Hook, ManagedService, Service, ServiceConfiguration, ServiceContext, ServiceError,
    },
};
use keel_error::{generic_error, GenericError};
use tokio::task::JoinSet;

/// Ordered record of hook invocations, shared between services in a tree.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn record(&self, hook: &str, service: &str) {
        self.0.lock().unwrap().push(format!("{}:{}", hook, service));
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct Calls {
    start: AtomicUsize,
    started: AtomicUsize,
    stop: AtomicUsize,
    shutdown: AtomicUsize,
}

impl Calls {
    fn start(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }

    fn stop(&self) -> usize {
        self.stop.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> usize {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Default)]
enum Task {
    #[default]
    None,

    /// Runs until the stop signal is set.
    UntilStop,

    /// Fails after the given delay.
    FailAfter(Duration),

    /// Never returns, ignoring the stop signal.
    Stuck,
}

struct MockService {
    name: &'static str,
    calls: Arc<Calls>,
    log: EventLog,
    start_delay: Duration,
    fail_init: bool,
    fail_start: bool,
    panic_start: bool,
    fail_stop: bool,
    hang_stop: bool,
    task: Task,
}

impl MockService {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Arc::new(Calls::default()),
            log: EventLog::default(),
            start_delay: Duration::ZERO,
            fail_init: false,
            fail_start: false,
            panic_start: false,
            fail_stop: false,
            hang_stop: false,
            task: Task::None,
        }
    }

    fn with_log(mut self, log: &EventLog) -> Self {
        self.log = log.clone();
        self
    }

    fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    fn panicking_start(mut self) -> Self {
        self.panic_start = true;
        self
    }

    fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    fn hanging_stop(mut self) -> Self {
        self.hang_stop = true;
        self
    }

    fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    fn calls(&self) -> Arc<Calls> {
        Arc::clone(&self.calls)
    }

    fn managed(self) -> (ManagedService, Arc<Calls>) {
        self.managed_with(ServiceConfiguration::default())
    }

    fn managed_with(self, config: ServiceConfiguration) -> (ManagedService, Arc<Calls>) {
        let calls = self.calls();
        (ManagedService::with_current_runtime(self, config), calls)
    }
}

#[async_trait]
impl Service for MockService {
    fn name(&self) -> &str {
        self.name
    }

    fn on_init(&self) -> Result<(), GenericError> {
        if self.fail_init {
            return Err(generic_error!("missing listen address"));
        }
        Ok(())
    }

    async fn on_start(&self, context: &ServiceContext) -> Result<(), GenericError> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.log.record("start", self.name);

        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.panic_start {
            panic!("listener exploded");
        }
        if self.fail_start {
            return Err(generic_error!("address already in use"));
        }

        match self.task {
            Task::None => {}
            Task::UntilStop => {
                let signals = context.signals().clone();
                context.spawn("worker", async move {
                    signals.wait_for_stop().await;
                    Ok(())
                })?;
            }
            Task::FailAfter(delay) => {
                context.spawn("worker", async move {
                    tokio::time::sleep(delay).await;
                    Err(generic_error!("connection reset"))
                })?;
            }
            Task::Stuck => {
                context.spawn("worker", std::future::pending::<Result<(), GenericError>>())?;
            }
        }

        Ok(())
    }

    async fn on_started(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        self.calls.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stop(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        self.log.record("stop", self.name);

        if self.hang_stop {
            std::future::pending::<()>().await;
        }
        if self.fail_stop {
            return Err(generic_error!("failed to flush buffers"));
        }
        Ok(())
    }

    async fn on_shutdown(&self, _context: &ServiceContext) -> Result<(), GenericError> {
        self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
        self.log.record("shutdown", self.name);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_start_runs_startup_once() {
    let (service, calls) = MockService::new("ingest")
        .with_start_delay(Duration::from_millis(50))
        .managed();

    let mut callers = JoinSet::new();
    for _ in 0..16 {
        let service = service.clone();
        callers.spawn(async move { service.start().await });
    }

    while let Some(result) = callers.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(calls.start(), 1);
    assert_eq!(calls.started.load(Ordering::SeqCst), 1);
    assert_eq!(service.state(), LifecycleState::Running);
    assert!(service.started());

    // Later calls are no-ops.
    service.start().await.unwrap();
    service.maybe_start().await.unwrap();
    assert_eq!(calls.start(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_start_failure_is_shared() {
    let (service, calls) = MockService::new("ingest")
        .with_start_delay(Duration::from_millis(50))
        .failing_start()
        .managed();

    let mut callers = JoinSet::new();
    for _ in 0..8 {
        let service = service.clone();
        callers.spawn(async move { service.start().await });
    }

    while let Some(result) = callers.join_next().await {
        let error = result.unwrap().unwrap_err();
        assert!(matches!(error, ServiceError::Startup { hook: Hook::Start, .. }));
        assert!(error.to_string().contains("address already in use"));
    }

    assert_eq!(calls.start(), 1);
    assert_eq!(service.state(), LifecycleState::Crashed);
}

#[tokio::test]
async fn start_failure_crashes_service() {
    let (service, calls) = MockService::new("ingest").failing_start().managed();

    let error = service.start().await.unwrap_err();
    assert!(matches!(error, ServiceError::Startup { hook: Hook::Start, .. }));
    assert_eq!(&**error.service(), "ingest");

    assert_eq!(service.state(), LifecycleState::Crashed);
    assert!(!service.started());
    assert!(service.should_stop());
    assert!(matches!(service.crash_reason(), Some(ServiceError::Startup { .. })));
    assert_eq!(calls.started.load(Ordering::SeqCst), 0);

    // Stopping a service that crashed while starting does nothing.
    service.stop().await.unwrap();
    assert_eq!(calls.stop(), 0);
    assert_eq!(service.state(), LifecycleState::Crashed);

    // Starting again returns the recorded failure without running anything.
    assert!(service.start().await.is_err());
    assert_eq!(calls.start(), 1);
}

#[tokio::test]
async fn start_panic_crashes_service() {
    let (service, _calls) = MockService::new("ingest").panicking_start().managed();

    let error = service.start().await.unwrap_err();
    assert!(matches!(error, ServiceError::Panicked { phase: Hook::Start, .. }));
    assert_eq!(service.state(), LifecycleState::Crashed);
}

#[tokio::test]
async fn init_failure_is_returned_from_start() {
    let (service, calls) = MockService::new("ingest").failing_init().managed();
    assert_eq!(service.state(), LifecycleState::Crashed);

    let error = service.start().await.unwrap_err();
    assert!(matches!(error, ServiceError::Startup { hook: Hook::Init, .. }));
    assert!(error.to_string().contains("missing listen address"));
    assert_eq!(calls.start(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_stop_runs_teardown_once() {
    let (service, calls) = MockService::new("ingest").with_task(Task::UntilStop).managed();
    service.start().await.unwrap();

    let mut callers = JoinSet::new();
    for _ in 0..16 {
        let service = service.clone();
        callers.spawn(async move { service.stop().await });
    }

    while let Some(result) = callers.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(calls.stop(), 1);
    assert_eq!(calls.shutdown(), 0);
    assert_eq!(service.state(), LifecycleState::Stopped);
    assert!(service.started());

    service.stop().await.unwrap();
    assert_eq!(calls.stop(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_start() {
    let (service, calls) = MockService::new("ingest")
        .with_start_delay(Duration::from_secs(1))
        .managed();

    let starter = tokio::spawn({
        let service = service.clone();
        async move { service.start().await }
    });
    tokio::task::yield_now().await;
    assert_eq!(service.state(), LifecycleState::Starting);

    service.stop().await.unwrap();
    starter.await.unwrap().unwrap();

    assert_eq!(calls.start(), 1);
    assert_eq!(calls.stop(), 1);
    assert!(service.started());
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn hanging_stop_hook_times_out() {
    let config = ServiceConfiguration::default().with_shutdown_timeout(Duration::from_secs(5));
    let (service, calls) = MockService::new("ingest").hanging_stop().managed_with(config);
    service.start().await.unwrap();

    let started_at = tokio::time::Instant::now();
    let error = service.stop().await.unwrap_err();

    assert!(started_at.elapsed() >= Duration::from_secs(5));
    assert!(error.is_timeout());
    assert!(matches!(
        error,
        ServiceError::ShutdownTimeout { hook: Hook::Stop, timeout, .. } if timeout == Duration::from_secs(5)
    ));
    assert_eq!(calls.stop(), 1);
    assert_eq!(service.state(), LifecycleState::Crashed);
}

#[tokio::test(start_paused = true)]
async fn stuck_background_task_times_out() {
    let config = ServiceConfiguration::default().with_shutdown_timeout(Duration::from_secs(2));
    let (service, _calls) = MockService::new("ingest").with_task(Task::Stuck).managed_with(config);
    service.start().await.unwrap();

    let error = service.stop().await.unwrap_err();
    assert!(matches!(
        error,
        ServiceError::ShutdownTimeout {
            hook: Hook::BackgroundTasks,
            ..
        }
    ));
    assert_eq!(service.state(), LifecycleState::Crashed);
}

#[tokio::test(start_paused = true)]
async fn background_task_failure_crashes_service() {
    let (service, calls) = MockService::new("ingest")
        .with_task(Task::FailAfter(Duration::from_millis(10)))
        .managed();
    service.start().await.unwrap();

    assert_eq!(service.wait_until_terminal().await, LifecycleState::Crashed);
    assert!(service.should_stop());
    assert_eq!(calls.stop(), 1);

    let error = service.stop().await.unwrap_err();
    match error {
        ServiceError::Crashed { task, source, .. } => {
            assert_eq!(&*task, "ingest.worker");
            assert_eq!(source.to_string(), "connection reset");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn children_stop_in_reverse_order() {
    let log = EventLog::default();
    let (parent, _) = MockService::new("parent").with_log(&log).managed();
    let (a, _) = MockService::new("a").with_log(&log).managed();
    let (b, _) = MockService::new("b").with_log(&log).managed();
    let (c, _) = MockService::new("c").with_log(&log).managed();
    for child in [&a, &b, &c] {
        parent.add_child(child.clone()).unwrap();
    }

    parent.start().await.unwrap();
    parent.stop().await.unwrap();

    assert_eq!(
        log.events(),
        vec![
            "start:parent",
            "start:a",
            "start:b",
            "start:c",
            "stop:parent",
            "stop:c",
            "stop:b",
            "stop:a",
        ]
    );
    for child in [&a, &b, &c] {
        assert_eq!(child.state(), LifecycleState::Stopped);
    }
}

#[tokio::test]
async fn failing_child_does_not_prevent_siblings_from_stopping() {
    let log = EventLog::default();
    let (parent, _) = MockService::new("parent").with_log(&log).managed();
    let (a, a_calls) = MockService::new("a").with_log(&log).managed();
    let (b, _) = MockService::new("b").with_log(&log).failing_stop().managed();
    let (c, c_calls) = MockService::new("c").with_log(&log).managed();
    for child in [&a, &b, &c] {
        parent.add_child(child.clone()).unwrap();
    }

    parent.start().await.unwrap();
    let error = parent.stop().await.unwrap_err();

    match &error {
        ServiceError::Teardown { service, failures } => {
            assert_eq!(&**service, "parent");
            assert_eq!(failures.services(), vec!["b"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(error.to_string().contains("failed to flush buffers"));

    assert_eq!(a_calls.stop(), 1);
    assert_eq!(c_calls.stop(), 1);
    assert_eq!(a.state(), LifecycleState::Stopped);
    assert_eq!(b.state(), LifecycleState::Crashed);
    assert_eq!(c.state(), LifecycleState::Stopped);
    assert_eq!(parent.state(), LifecycleState::Crashed);
}

#[tokio::test]
async fn children_first_start_order() {
    let log = EventLog::default();
    let config = ServiceConfiguration::default().with_child_start_order(ChildStartOrder::ChildrenFirst);
    let (parent, _) = MockService::new("parent").with_log(&log).managed_with(config);
    let (a, _) = MockService::new("a").with_log(&log).managed();
    let (b, _) = MockService::new("b").with_log(&log).managed();
    parent.add_child(a).unwrap();
    parent.add_child(b).unwrap();

    parent.start().await.unwrap();

    assert_eq!(log.events(), vec!["start:a", "start:b", "start:parent"]);
}

#[tokio::test]
async fn child_start_failure_stops_started_children() {
    let (parent, parent_calls) = MockService::new("parent").managed();
    let (a, a_calls) = MockService::new("a").managed();
    let (b, _) = MockService::new("b").failing_start().managed();
    let (c, c_calls) = MockService::new("c").managed();
    for child in [&a, &b, &c] {
        parent.add_child(child.clone()).unwrap();
    }

    let error = parent.start().await.unwrap_err();
    match &error {
        ServiceError::ChildStartup { service, child, source } => {
            assert_eq!(&**service, "parent");
            assert_eq!(&**child, "b");
            assert!(matches!(**source, ServiceError::Startup { hook: Hook::Start, .. }));
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(parent.state(), LifecycleState::Crashed);
    assert!(!parent.started());
    assert_eq!(parent_calls.started.load(Ordering::SeqCst), 0);

    assert_eq!(a.state(), LifecycleState::Stopped);
    assert_eq!(a_calls.stop(), 1);
    assert_eq!(b.state(), LifecycleState::Crashed);
    assert_eq!(c.state(), LifecycleState::Stopped);
    assert_eq!(c_calls.start(), 0);
    assert_eq!(c_calls.stop(), 0);
}

#[tokio::test]
async fn stop_before_start_skips_hooks() {
    let (parent, parent_calls) = MockService::new("parent").managed();
    let (child, child_calls) = MockService::new("child").managed();
    parent.add_child(child.clone()).unwrap();

    parent.stop().await.unwrap();

    assert_eq!(parent.state(), LifecycleState::Stopped);
    assert_eq!(child.state(), LifecycleState::Stopped);
    assert_eq!(parent_calls.stop(), 0);
    assert_eq!(child_calls.stop(), 0);

    // A stopped service is never started again.
    parent.start().await.unwrap();
    assert_eq!(parent.state(), LifecycleState::Stopped);
    assert_eq!(parent_calls.start(), 0);
    assert!(!parent.started());
}

#[tokio::test]
async fn shutdown_runs_shutdown_hooks_through_tree() {
    let log = EventLog::default();
    let (parent, parent_calls) = MockService::new("parent").with_log(&log).managed();
    let (child, child_calls) = MockService::new("child").with_log(&log).managed();
    parent.add_child(child.clone()).unwrap();

    parent.start().await.unwrap();
    parent.shutdown().await.unwrap();

    assert!(parent.should_shutdown());
    assert_eq!(parent.state(), LifecycleState::Shutdown);
    assert_eq!(child.state(), LifecycleState::Shutdown);
    assert_eq!(parent_calls.shutdown(), 1);
    assert_eq!(child_calls.shutdown(), 1);
    assert_eq!(
        log.events(),
        vec![
            "start:parent",
            "start:child",
            "stop:parent",
            "stop:child",
            "shutdown:child",
            "shutdown:parent",
        ]
    );
}

#[tokio::test]
async fn set_shutdown_tears_down_in_background() {
    let (service, calls) = MockService::new("ingest").with_task(Task::UntilStop).managed();
    service.start().await.unwrap();

    service.set_shutdown();

    assert_eq!(service.wait_until_terminal().await, LifecycleState::Shutdown);
    assert_eq!(calls.stop(), 1);
    assert_eq!(calls.shutdown(), 1);
}

#[tokio::test]
async fn wait_for_shutdown_holds_stop_until_shutdown_requested() {
    let config = ServiceConfiguration::default().with_wait_for_shutdown(true);
    let (service, calls) = MockService::new("ingest").managed_with(config);
    service.start().await.unwrap();

    let stopper = tokio::spawn({
        let service = service.clone();
        async move { service.stop().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopper.is_finished());
    assert_eq!(service.state(), LifecycleState::Stopping);
    assert_eq!(calls.stop(), 1);
    assert_eq!(calls.shutdown(), 0);

    service.set_shutdown();
    stopper.await.unwrap().unwrap();

    assert_eq!(service.state(), LifecycleState::Shutdown);
    assert_eq!(calls.shutdown(), 1);
}

#[tokio::test]
async fn add_child_rejects_invalid_trees() {
    let (parent, _) = MockService::new("parent").managed();
    let (child, _) = MockService::new("child").managed();
    let (other, _) = MockService::new("other").managed();

    assert!(matches!(
        parent.add_child(parent.clone()),
        Err(ServiceError::InvalidChild { .. })
    ));

    parent.add_child(child.clone()).unwrap();
    assert!(matches!(
        child.add_child(parent.clone()),
        Err(ServiceError::InvalidChild { .. })
    ));
    assert!(matches!(
        other.add_child(child.clone()),
        Err(ServiceError::ChildAlreadyOwned { .. })
    ));

    parent.start().await.unwrap();
    let (late, _) = MockService::new("late").managed();
    assert!(matches!(
        parent.add_child(late),
        Err(ServiceError::ChildrenSealed {
            state: LifecycleState::Running,
            ..
        })
    ));

    let children = parent.children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id(), child.id());
}

#[tokio::test]
async fn scoped_error_stops_service_once() {
    let (service, calls) = MockService::new("ingest").managed();

    let error = service
        .scoped(|service| async move {
            assert_eq!(service.state(), LifecycleState::Running);
            Err::<(), _>(generic_error!("request handler failed"))
        })
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "request handler failed");
    assert_eq!(calls.start(), 1);
    assert_eq!(calls.stop(), 1);
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn scoped_cancellation_stops_service() {
    let (service, calls) = MockService::new("ingest").with_task(Task::UntilStop).managed();

    let scope = service.scoped(|_| std::future::pending::<Result<(), GenericError>>());
    assert!(tokio::time::timeout(Duration::from_millis(50), scope).await.is_err());

    assert!(service.should_stop());
    assert_eq!(service.wait_until_terminal().await, LifecycleState::Stopped);
    assert_eq!(calls.start(), 1);
    assert_eq!(calls.stop(), 1);
}

#[tokio::test]
async fn scoped_returns_body_value() {
    let (service, calls) = MockService::new("ingest").managed();

    let value = service.scoped(|_| async { Ok(42) }).await.unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.stop(), 1);
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn scoped_does_not_run_body_when_start_fails() {
    let (service, _calls) = MockService::new("ingest").failing_start().managed();
    let ran = Arc::new(AtomicUsize::new(0));

    let result = service
        .scoped({
            let ran = Arc::clone(&ran);
            |_| async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(service.state(), LifecycleState::Crashed);
}

#[tokio::test]
async fn released_guard_stops_service() {
    let (service, calls) = MockService::new("ingest").managed();

    let guard = service.acquire().await.unwrap();
    assert_eq!(guard.state(), LifecycleState::Running);
    guard.release().await.unwrap();

    assert_eq!(calls.stop(), 1);
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn dropped_guard_schedules_stop() {
    let (service, calls) = MockService::new("ingest").with_task(Task::UntilStop).managed();

    let guard = service.acquire().await.unwrap();
    drop(guard);

    assert!(service.should_stop());
    assert_eq!(service.wait_until_terminal().await, LifecycleState::Stopped);
    assert_eq!(calls.stop(), 1);
}

struct ContextHolder {
    context: Mutex<Option<ServiceContext>>,
}

#[async_trait]
impl Service for ContextHolder {
    fn name(&self) -> &str {
        "holder"
    }

    async fn on_start(&self, context: &ServiceContext) -> Result<(), GenericError> {
        *self.context.lock().unwrap() = Some(context.clone());
        Ok(())
    }
}

#[tokio::test]
async fn spawn_after_stop_is_rejected() {
    let holder = Arc::new(ContextHolder {
        context: Mutex::new(None),
    });
    let service = ManagedService::from_arc(
        Arc::clone(&holder) as Arc<dyn Service>,
        ServiceConfiguration::default(),
        tokio::runtime::Handle::current(),
    );

    service.start().await.unwrap();
    service.stop().await.unwrap();

    let context = holder.context.lock().unwrap().clone().unwrap();
    assert!(context.should_stop());
    assert!(!context.should_shutdown());
    let error = context.spawn("late", async { Ok(()) }).unwrap_err();
    match error {
        ServiceError::TaskRejected { task, .. } => assert_eq!(&*task, "holder.late"),
        other => panic!("unexpected error: {}", other),
    }
}
