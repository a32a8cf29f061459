use std::future::Future;

use futures::future::{BoxFuture, FutureExt as _, Shared};
use tokio::{runtime::Handle, task::JoinError};

/// A single-flight barrier around a spawned task.
///
/// The task is spawned exactly once, on the given runtime, when the flight is created. Every caller that awaits the
/// flight, no matter when it starts waiting, observes the same output. The task runs to completion even if every
/// waiter goes away, so a caller being cancelled never leaves a lifecycle phase half-done.
pub(crate) struct Flight<T: Clone> {
    shared: Shared<BoxFuture<'static, T>>,
}

impl<T> Flight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns `fut` on `runtime` and wraps its output in a shared barrier.
    ///
    /// If the task panics or is cancelled, `on_join_error` converts the join error into the flight's output.
    pub(crate) fn spawn<F, E>(runtime: &Handle, fut: F, on_join_error: E) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        E: FnOnce(JoinError) -> T + Send + 'static,
    {
        let task = runtime.spawn(fut);
        let shared = async move {
            match task.await {
                Ok(output) => output,
                Err(e) => on_join_error(e),
            }
        }
        .boxed()
        .shared();

        Self { shared }
    }

    /// Waits for the flight to complete and returns its output.
    pub(crate) fn wait(&self) -> Shared<BoxFuture<'static, T>> {
        self.shared.clone()
    }
}

impl<T: Clone> Clone for Flight<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
