//! Client side of the chunkbus transport binding.
//!
//! [`BusClient`] is one live WebSocket connection with typed calls,
//! signal subscription, and a close-notification hook.
//! [`ConnectionSupervisor`] owns the client for its lifetime and layers
//! connection state tracking, a periodic liveness probe, bounded
//! auto-reconnect, and the outage gate on top. All application RPC goes
//! through the supervisor.

mod heartbeat;
mod pumps;
mod reconnection;
mod supervisor;
mod types;
mod ws_client;

pub use supervisor::{ConnectionSupervisor, ListenerHandle, Subscription};
pub use types::{ConnectionState, StateListener, SupervisorConfig};
pub use ws_client::{BusClient, CallError, SignalHandler};
