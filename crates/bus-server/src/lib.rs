//! WebSocket server side of the chunkbus transport binding.
//!
//! Listens on a loopback TCP port, upgrades connections to WebSocket,
//! dispatches JSON envelopes to a [`ServiceHandler`] vtable, and fans
//! broadcast signals out to every connected peer. Connection lifecycle
//! (ping/pong, pong deadline, graceful shutdown) is handled here so the
//! service implementation only sees typed calls.

mod broadcast;
mod connection;
mod handler;
mod server;

pub use broadcast::SignalBroadcaster;
pub use connection::{SendError, Sender};
pub use handler::{HandlerFuture, ServiceHandler};
pub use server::{BusServer, ServerConfig};

/// Send buffer capacity per connection.
///
/// A transfer produces one ACK per chunk plus broadcast traffic; a small
/// buffer can saturate and cause `try_send()` to drop frames.
pub const SEND_BUFFER_SIZE: usize = 1024;

/// Errors produced by the bus server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
