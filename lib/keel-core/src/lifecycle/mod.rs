//! Lifecycle primitives.
//!
//! The state machine every managed service moves through, and the signals used to tell a service, and everything it
//! runs, to stop or shut down.

mod flight;
pub(crate) use self::flight::Flight;

mod signal;
pub use self::signal::{Signal, SignalSet};

mod state;
pub use self::state::{IllegalTransition, LifecycleState};
