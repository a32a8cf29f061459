use std::future::Future;

use tokio_util::sync::CancellationToken;

/// A one-shot, broadcast signal.
///
/// A signal starts out unset, and once set, stays set forever. Any number of observers can check whether it has been
/// set, or wait for it to be set, and observers that start waiting after the signal was set return immediately.
///
/// Clones share the same underlying signal.
#[derive(Clone, Debug, Default)]
pub struct Signal {
    token: CancellationToken,
}

impl Signal {
    /// Creates a new, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal, waking all current waiters.
    ///
    /// Setting an already-set signal has no effect.
    pub fn set(&self) {
        self.token.cancel();
    }

    /// Returns `true` if the signal has been set.
    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the signal is set.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// Returns a future that resolves once the signal is set, without borrowing the signal.
    ///
    /// This is useful when the future has to be moved into a spawned task or stored alongside other state.
    pub fn wait_owned(&self) -> impl Future<Output = ()> + Send + 'static {
        self.token.clone().cancelled_owned()
    }
}

/// The pair of lifecycle signals observed by a service and everything it runs.
///
/// - `stop`: the service should unwind its normal operation.
/// - `shutdown`: full, terminal teardown has been requested. Setting `shutdown` always sets `stop` as well.
///
/// Clones share the same underlying signals, so a `SignalSet` can be handed to hooks, background tasks, and external
/// observers alike.
#[derive(Clone, Debug, Default)]
pub struct SignalSet {
    stop: Signal,
    shutdown: Signal,
}

impl SignalSet {
    /// Creates a new `SignalSet` with both signals unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the service has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.stop.is_set()
    }

    /// Returns `true` if the service has been asked to shut down.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Sets the stop signal.
    pub fn set_stop(&self) {
        self.stop.set();
    }

    /// Sets the shutdown signal, and the stop signal along with it.
    pub fn set_shutdown(&self) {
        // Stop goes first so that anyone who observes `shutdown` also observes `stop`.
        self.stop.set();
        self.shutdown.set();
    }

    /// Waits until the stop signal is set.
    pub async fn wait_for_stop(&self) {
        self.stop.wait().await
    }

    /// Waits until the shutdown signal is set.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.wait().await
    }

    /// Returns the stop signal.
    pub fn stop_signal(&self) -> &Signal {
        &self.stop
    }

    /// Returns the shutdown signal.
    pub fn shutdown_signal(&self) -> &Signal {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{task::JoinSet, time::timeout};
    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    #[tokio::test]
    async fn set_wakes_every_waiter() {
        let signal = Signal::new();
        let mut waiters = JoinSet::new();
        for _ in 0..16 {
            let signal = signal.clone();
            waiters.spawn(async move { signal.wait().await });
        }

        // Give the waiters a chance to actually start waiting.
        tokio::task::yield_now().await;
        assert!(!signal.is_set());

        signal.set();

        let all_done = timeout(Duration::from_secs(1), async {
            while let Some(result) = waiters.join_next().await {
                result.unwrap();
            }
        })
        .await;
        assert!(all_done.is_ok(), "all waiters should wake once the signal is set");
    }

    #[tokio::test]
    async fn set_is_sticky() {
        let signal = Signal::new();
        signal.set();
        signal.set();

        assert!(signal.is_set());
        timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("late waiter should return immediately");
        timeout(Duration::from_millis(100), signal.wait_owned())
            .await
            .expect("owned waiter should return immediately");
    }

    #[tokio::test]
    async fn shutdown_implies_stop() {
        let signals = SignalSet::new();
        assert!(!signals.should_stop());
        assert!(!signals.should_shutdown());

        signals.set_shutdown();

        assert!(signals.should_stop());
        assert!(signals.should_shutdown());
        timeout(Duration::from_millis(100), signals.wait_for_stop())
            .await
            .unwrap();
    }

    #[test]
    fn stop_does_not_imply_shutdown() {
        let signals = SignalSet::new();
        let mut wait_for_stop = tokio_test::task::spawn(signals.wait_for_stop());
        let mut wait_for_shutdown = tokio_test::task::spawn(signals.wait_for_shutdown());
        assert_pending!(wait_for_stop.poll());
        assert_pending!(wait_for_shutdown.poll());

        signals.set_stop();

        assert!(signals.should_stop());
        assert!(!signals.should_shutdown());
        assert!(wait_for_stop.is_woken());
        assert_ready!(wait_for_stop.poll());
        assert_pending!(wait_for_shutdown.poll());
    }

    #[test]
    fn clones_share_state() {
        let signals = SignalSet::new();
        let observer = signals.clone();

        signals.set_stop();
        assert!(observer.should_stop());
        assert!(observer.stop_signal().is_set());
        assert!(!observer.shutdown_signal().is_set());
    }
}
