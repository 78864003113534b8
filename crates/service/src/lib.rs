//! The `com.example.TestService` implementation.
//!
//! Combines the echo key/value store, the file receiver, and the bus
//! dispatch glue. Broadcasts go through the emit-only [`SignalEmitter`]
//! interface, installed after construction, so the service never holds
//! the transport that holds it.

mod dispatch;
mod emitter;
mod service;
mod store;

pub use dispatch::ServiceDispatcher;
pub use emitter::BroadcastEmitter;
pub use service::{SignalEmitter, TestService};
pub use store::EchoStore;
