//! Liveness probe — the cheapest RPC on a short timeout, periodically.

use tracing::{debug, warn};

use chunkbus_protocol::constants::Member;

use crate::reconnection::{SupervisorCtx, handle_connection_lost};
use crate::types::ConnectionState;

/// Probes `GetTestBool` every heartbeat interval while connected.
///
/// Only the peer-disconnected failure kind flips the connection state; a
/// timeout or method-error means the service is slow or simply does not
/// know the key, and the connection stays up.
pub(crate) async fn heartbeat_loop(ctx: SupervisorCtx) {
    let mut interval = tokio::time::interval(ctx.config.heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,

            _ = interval.tick() => {
                if ctx.state() != ConnectionState::Connected {
                    continue;
                }

                let result = {
                    let guard = ctx.client.lock().await;
                    match guard.as_ref() {
                        Some(client) => {
                            client
                                .call::<()>(Member::GetTestBool, None, ctx.config.probe_timeout)
                                .await
                        }
                        None => continue,
                    }
                };

                match result {
                    Ok(_) => {}
                    Err(e) if e.is_disconnected() => {
                        warn!("heartbeat lost the peer");
                        handle_connection_lost(ctx.clone()).await;
                    }
                    Err(e) => {
                        debug!(error = %e, "heartbeat probe failed, staying connected");
                    }
                }
            }
        }
    }
}
