use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ManagedService, Name, ServiceError, ServiceResult, TeardownFailure, TeardownFailures};

/// The order in which a service and its children are started.
///
/// Children are always started in the order they were added, and always stopped in the reverse order, after the
/// parent's `on_stop` hook has run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStartOrder {
    /// The parent's `on_start` hook runs first, and children are started once it completes.
    ///
    /// This is the default.
    #[default]
    ParentFirst,

    /// Children are started first, and the parent's `on_start` hook runs once they are all running.
    ChildrenFirst,
}

/// Starts every child, in order, stopping at the first one that fails.
///
/// Children that were already started are left running: the caller is responsible for stopping them.
pub(super) async fn start_children(parent: &Name, children: &[ManagedService]) -> ServiceResult {
    for (idx, child) in children.iter().enumerate() {
        debug!(child_name = %child.name(), "Starting child service #{}.", idx);
        if let Err(e) = child.start_future().await {
            return Err(ServiceError::ChildStartup {
                service: parent.clone(),
                child: child.name().clone(),
                source: Box::new(e),
            });
        }
    }

    Ok(())
}

/// Stops every child, in reverse order, collecting failures.
///
/// A child failing to stop does not prevent the remaining children from being stopped. If `shutdown` is `true`,
/// children are shut down rather than stopped.
pub(super) async fn stop_children(children: &[ManagedService], shutdown: bool, failures: &mut TeardownFailures) {
    for child in children.iter().rev() {
        debug!(child_name = %child.name(), shutdown, "Stopping child service.");

        let result = if shutdown {
            child.shutdown_future().await
        } else {
            child.stop_future().await
        };

        if let Err(e) = result {
            warn!(child_name = %child.name(), error = %e, "Child service failed to stop.");
            failures.push(TeardownFailure::new(child.name().clone(), e));
        }
    }
}
