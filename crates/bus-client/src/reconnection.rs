//! Shared supervisor context, connection establishment, and the bounded
//! reconnect worker.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunkbus_protocol::constants::Member;

use crate::types::{ConnectionState, StateListener, SupervisorConfig};
use crate::ws_client::{BusClient, CallError, SignalRegistry};

/// Shared state passed to the free functions of the supervisor machinery.
/// Avoids threading half a dozen separate `Arc` parameters around.
#[derive(Clone)]
pub(crate) struct SupervisorCtx {
    pub(crate) url: String,
    pub(crate) config: SupervisorConfig,
    pub(crate) client: Arc<tokio::sync::Mutex<Option<BusClient>>>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) signals: SignalRegistry,
    /// Listener list has its own lock, separate from the connection lock.
    pub(crate) listeners: Arc<std::sync::Mutex<Vec<(u64, StateListener)>>>,
    pub(crate) reconnect_active: Arc<AtomicBool>,
    pub(crate) cancel: CancellationToken,
}

impl SupervisorCtx {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn notify_listeners(&self, connected: bool) {
        let listeners = self.listeners.lock().unwrap();
        for (_, cb) in listeners.iter() {
            cb(connected);
        }
    }
}

/// Dials the endpoint, installs the close callback, probes the service,
/// and on success publishes the client and the `Connected` state.
pub(crate) async fn establish(ctx: &SupervisorCtx) -> Result<(), CallError> {
    let client = BusClient::connect(&ctx.url, ctx.signals.clone()).await?;

    let cb_ctx = ctx.clone();
    client
        .set_close_callback(Box::new(move |peer_vanished| {
            // Runs on the read pump; hand off immediately.
            let ctx = cb_ctx.clone();
            tokio::spawn(async move {
                if peer_vanished {
                    handle_connection_lost(ctx).await;
                }
                // A local close is supervisor-initiated; nothing to do.
            });
        }))
        .await;

    // Probe before accepting the connection. A method-error still proves
    // the peer is alive; only timeout or disconnection fails the attempt.
    match client
        .call::<()>(Member::GetTestBool, None, ctx.config.probe_timeout)
        .await
    {
        Ok(_) | Err(CallError::Method { .. }) => {}
        Err(e) => {
            client.close().await;
            return Err(e);
        }
    }

    *ctx.client.lock().await = Some(client);
    ctx.set_state(ConnectionState::Connected);
    Ok(())
}

/// Handles an observed connection loss: flips state, notifies listeners,
/// drops the dead client, and kicks the reconnect worker.
pub(crate) async fn handle_connection_lost(ctx: SupervisorCtx) {
    if ctx.state() != ConnectionState::Connected {
        return;
    }
    warn!("connection to the bus peer lost");
    ctx.set_state(ConnectionState::Disconnected);
    ctx.notify_listeners(false);
    if let Some(client) = ctx.client.lock().await.take() {
        client.close().await;
    }
    maybe_spawn_reconnect(&ctx);
}

/// Spawns the reconnect worker unless one is already active, reconnection
/// is disabled, or the supervisor is shutting down.
pub(crate) fn maybe_spawn_reconnect(ctx: &SupervisorCtx) {
    if !ctx.config.auto_reconnect || ctx.cancel.is_cancelled() {
        return;
    }
    if ctx
        .reconnect_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        tokio::spawn(reconnect_loop(ctx.clone()));
    }
}

/// Reconnect worker: bounded attempts spaced by the configured interval.
///
/// Boxed to break the type cycle with `establish`, whose close callback
/// spawns this function again on a later disconnect.
pub(crate) fn reconnect_loop(
    ctx: SupervisorCtx,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut attempt: u32 = 0;

        while attempt < ctx.config.max_reconnect_attempts {
            attempt += 1;
            ctx.set_state(ConnectionState::Connecting);
            info!(attempt, "reconnecting");

            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!("reconnect cancelled");
                    break;
                }
                _ = tokio::time::sleep(ctx.config.reconnect_interval) => {}
            }
            if ctx.cancel.is_cancelled() {
                break;
            }

            match establish(&ctx).await {
                Ok(()) => {
                    ctx.notify_listeners(true);
                    info!(attempt, "reconnected");
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    ctx.set_state(ConnectionState::Disconnected);
                }
            }
        }

        if ctx.state() != ConnectionState::Connected && !ctx.cancel.is_cancelled() {
            info!("reconnect attempts exhausted");
            ctx.set_state(ConnectionState::Disconnected);
        }
        ctx.reconnect_active.store(false, Ordering::SeqCst);
    })
}
