//! Connection supervisor — owns the transport handle for its lifetime.
//!
//! Wraps a [`BusClient`] with connection state tracking, a heartbeat
//! probe, bounded auto-reconnect, and the outage gate
//! ([`wait_connected`](ConnectionSupervisor::wait_connected)). All
//! application RPC goes through [`call`](ConnectionSupervisor::call).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use chunkbus_protocol::Message;
use chunkbus_protocol::constants::Member;

use crate::heartbeat::heartbeat_loop;
use crate::reconnection::{
    SupervisorCtx, establish, handle_connection_lost, maybe_spawn_reconnect,
};
use crate::types::{ConnectionState, StateListener, SupervisorConfig};
use crate::ws_client::{CallError, SignalHandler};

/// Token returned by [`ConnectionSupervisor::add_listener`]; pass it back
/// to [`remove_listener`](ConnectionSupervisor::remove_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

/// Token returned by [`ConnectionSupervisor::subscribe`]; pass it back to
/// [`unsubscribe`](ConnectionSupervisor::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    member: Member,
    id: u64,
}

/// Supervises a single bus connection.
pub struct ConnectionSupervisor {
    ctx: SupervisorCtx,
    next_id: AtomicU64,
    heartbeat: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for the given endpoint URL. Initially
    /// [`Disconnected`](ConnectionState::Disconnected); call
    /// [`init`](Self::init) to bring the connection up.
    pub fn new(url: impl Into<String>, config: SupervisorConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let ctx = SupervisorCtx {
            url: url.into(),
            config,
            client: Arc::new(tokio::sync::Mutex::new(None)),
            state_tx,
            signals: Arc::new(std::sync::Mutex::new(HashMap::new())),
            listeners: Arc::new(std::sync::Mutex::new(Vec::new())),
            reconnect_active: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };

        let heartbeat = tokio::spawn(heartbeat_loop(ctx.clone()));

        Arc::new(Self {
            ctx,
            next_id: AtomicU64::new(0),
            heartbeat: std::sync::Mutex::new(Some(heartbeat)),
        })
    }

    /// Establishes the initial connection.
    ///
    /// On failure the supervisor falls back to `Disconnected` and, when
    /// auto-reconnect is enabled, the reconnect worker keeps trying in
    /// the background.
    pub async fn init(&self) -> Result<(), CallError> {
        self.ctx.set_state(ConnectionState::Connecting);
        match establish(&self.ctx).await {
            Ok(()) => {
                self.ctx.notify_listeners(true);
                tracing::info!(url = %self.ctx.url, "connected to bus peer");
                Ok(())
            }
            Err(e) => {
                self.ctx.set_state(ConnectionState::Disconnected);
                maybe_spawn_reconnect(&self.ctx);
                Err(e)
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    /// A watch receiver over the connection state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state_tx.subscribe()
    }

    /// The outage gate: waits up to `timeout` for `Connected`.
    ///
    /// Returns `false` on timeout or when the supervisor is shutting
    /// down.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.ctx.state_tx.subscribe();
        tokio::time::timeout(timeout, async move {
            loop {
                match *rx.borrow_and_update() {
                    ConnectionState::Connected => return true,
                    ConnectionState::ShuttingDown => return false,
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Calls `member` with the default call timeout.
    pub async fn call<T: serde::Serialize>(
        &self,
        member: Member,
        payload: Option<&T>,
    ) -> Result<Message, CallError> {
        self.call_with_timeout(member, payload, self.ctx.config.call_timeout)
            .await
    }

    /// Calls `member` with an explicit timeout.
    ///
    /// While disconnected no call is issued; callers that can wait should
    /// sit on [`wait_connected`](Self::wait_connected) first. A
    /// peer-disconnected failure flips the supervisor state as a side
    /// effect.
    pub async fn call_with_timeout<T: serde::Serialize>(
        &self,
        member: Member,
        payload: Option<&T>,
        timeout: Duration,
    ) -> Result<Message, CallError> {
        if self.state() != ConnectionState::Connected {
            return Err(CallError::Disconnected);
        }

        // The connection lock serialises calls against reconnection
        // swapping the client out underneath them.
        let guard = self.ctx.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return Err(CallError::Disconnected);
        };
        let result = client.call(member, payload, timeout).await;
        drop(guard);

        if let Err(e) = &result
            && e.is_disconnected()
        {
            tokio::spawn(handle_connection_lost(self.ctx.clone()));
        }
        result
    }

    /// Registers a handler for a broadcast signal. The registration
    /// survives reconnects; drop it with [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, member: Member, handler: SignalHandler) -> Subscription {
        debug_assert!(member.is_signal());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ctx
            .signals
            .lock()
            .unwrap()
            .entry(member)
            .or_default()
            .push((id, handler));
        Subscription { member, id }
    }

    /// Removes a signal registration.
    pub fn unsubscribe(&self, sub: Subscription) {
        let mut signals = self.ctx.signals.lock().unwrap();
        if let Some(handlers) = signals.get_mut(&sub.member) {
            handlers.retain(|(id, _)| *id != sub.id);
        }
    }

    /// Registers a connection-state listener, called with `true` when the
    /// connection (re)establishes and `false` when it is lost.
    pub fn add_listener(&self, listener: StateListener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ctx.listeners.lock().unwrap().push((id, listener));
        ListenerHandle(id)
    }

    /// Removes a connection-state listener.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.ctx
            .listeners
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != handle.0);
    }

    /// Shuts the supervisor down: terminal state, workers stop, the
    /// connection closes.
    pub async fn shutdown(&self) {
        self.ctx.set_state(ConnectionState::ShuttingDown);
        self.ctx.cancel.cancel();
        if let Some(client) = self.ctx.client.lock().await.take() {
            client.close().await;
        }
        let heartbeat = self.heartbeat.lock().unwrap().take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }
        tracing::info!("supervisor shut down");
    }
}
