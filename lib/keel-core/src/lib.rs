//! Lifecycle runtime for managed services.
//!
//! A managed service is a long-lived unit of work with an explicit lifecycle: it is initialized, started exactly once,
//! runs until asked to stop, and is then stopped, and optionally shut down, exactly once. Services can own child
//! services, forming a tree that is started in order and torn down in reverse order.
//!
//! The behavior of a service is provided by implementing [`service::Service`], and the lifecycle is driven through a
//! [`service::ManagedService`] handle. The lifecycle state machine and the stop/shutdown signals live in
//! [`lifecycle`].
#![deny(missing_docs)]

pub mod lifecycle;
pub mod service;
