//! One live WebSocket connection to the bus endpoint.
//!
//! Implements the typed call pattern with UUID correlation, signal
//! dispatch into a subscriber registry, and a close-notification hook.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;

use chunkbus_protocol::constants::{Member, WS_MAX_MESSAGE_SIZE, signatures};
use chunkbus_protocol::envelope::Message;

/// Failures of a bus call. Callers distinguish [`Timeout`],
/// [`Disconnected`], and [`Method`]; the rest are local encode errors.
///
/// [`Timeout`]: CallError::Timeout
/// [`Disconnected`]: CallError::Disconnected
/// [`Method`]: CallError::Method
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("call timed out")]
    Timeout,

    #[error("peer disconnected")]
    Disconnected,

    #[error("method error {code}: {message}")]
    Method { code: i32, message: String },
}

impl CallError {
    /// `true` for the failure kind that means the peer is gone.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, CallError::Disconnected | CallError::Ws(_))
    }
}

/// Callback invoked with each matching signal frame.
///
/// Handlers run on the read pump; they must not block. Enqueue to a
/// worker pool for anything heavier than bookkeeping.
pub type SignalHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Signal subscriber registry, shared between the supervisor and the read
/// pump of whichever client is currently alive. Keeping it outside the
/// client means reconnects resubscribe for free.
pub(crate) type SignalRegistry =
    Arc<std::sync::Mutex<HashMap<Member, Vec<(u64, SignalHandler)>>>>;

/// Callback fired when the connection drops. The flag is `true` when the
/// peer vanished (socket error or silence) rather than a local close.
pub(crate) type CloseCallback = Arc<Mutex<Option<Box<dyn Fn(bool) + Send + Sync>>>>;

/// One live connection to the bus endpoint.
pub struct BusClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
    on_close: CloseCallback,
    cancel: tokio_util::sync::CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl BusClient {
    /// Dials the bus endpoint and starts the connection pumps.
    ///
    /// `signals` is consulted by the read pump for every signal frame.
    pub async fn connect(url: &str, signals: SignalRegistry) -> Result<Self, CallError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let on_close: CloseCallback = Arc::new(Mutex::new(None));
        let cancel = tokio_util::sync::CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let on_close = on_close.clone();
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, pending, signals, on_close, write_tx, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        Ok(Self {
            write_tx,
            pending,
            on_close,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        })
    }

    /// Calls `member` and waits up to `timeout` for the method return.
    ///
    /// The envelope carries the member's bus signature; `payload` is
    /// `None` for nullary methods. An `Error` frame surfaces as
    /// [`CallError::Method`].
    pub async fn call<T: serde::Serialize>(
        &self,
        member: Member,
        payload: Option<&T>,
        timeout: std::time::Duration,
    ) -> Result<Message, CallError> {
        let in_sig = signatures(member).map(|(in_sig, _)| in_sig);
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, member, in_sig, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| CallError::Disconnected)?;

        let result = tokio::time::timeout(timeout, rx).await;

        // Clean up the pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => {
                if let Some(err) = &resp.error {
                    return Err(CallError::Method {
                        code: err.code,
                        message: err.message.clone(),
                    });
                }
                Ok(resp)
            }
            Ok(Err(_)) => Err(CallError::Disconnected),
            Err(_) => Err(CallError::Timeout),
        }
    }

    /// Sets the callback fired when the connection drops.
    pub async fn set_close_callback(&self, cb: Box<dyn Fn(bool) + Send + Sync>) {
        *self.on_close.lock().await = Some(cb);
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}
