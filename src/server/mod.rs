//! Accepting connections, dispatching them to workers, and the server lifecycle.

pub mod dispatcher;
pub mod lifecycle;
pub mod listener;
pub mod tracker;

pub use lifecycle::{BoundServer, LifecycleState, Server};
