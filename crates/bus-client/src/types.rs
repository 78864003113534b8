use std::time::Duration;

use chunkbus_protocol::constants::{
    CALL_TIMEOUT, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, PROBE_TIMEOUT, RECONNECT_INTERVAL,
};

/// Connection lifecycle of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; workers observe it and exit.
    ShuttingDown,
}

/// Callback invoked with `true` when the connection (re)establishes and
/// `false` when it is lost.
pub type StateListener = Box<dyn Fn(bool) + Send + Sync>;

/// Supervisor tuning knobs. The defaults match the service contract;
/// tests shorten them.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Spacing of the liveness probe.
    pub heartbeat_interval: Duration,
    /// Timeout of the probe call.
    pub probe_timeout: Duration,
    /// Timeout applied to ordinary method calls.
    pub call_timeout: Duration,
    /// Spacing between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Attempts before the reconnect worker gives up.
    pub max_reconnect_attempts: u32,
    /// Whether connection loss spawns the reconnect worker at all.
    pub auto_reconnect: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
            call_timeout: CALL_TIMEOUT,
            reconnect_interval: RECONNECT_INTERVAL,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
        }
    }
}
