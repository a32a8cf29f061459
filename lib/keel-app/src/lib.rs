//! Application bootstrap primitives.
//!
//! Everything a process needs around the service runtime itself: initializing logging from configuration, and wiring
//! process termination signals to the shutdown of a managed service.
#![deny(warnings)]
#![deny(missing_docs)]

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "signals")]
pub mod signals;

/// Common imports.
pub mod prelude {
    #[cfg(feature = "logging")]
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration};
    #[cfg(feature = "signals")]
    pub use super::signals::{shutdown_on, shutdown_on_termination_signal, wait_for_termination_signal};
}
