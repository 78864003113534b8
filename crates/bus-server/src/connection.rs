//! Per-peer connection management: read/write pumps, ping/pong, dispatch.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use chunkbus_protocol::constants::{
    ERR_BAD_REQUEST, ERR_NOT_IMPLEMENTED, Member, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD,
    WS_PONG_WAIT,
};
use chunkbus_protocol::envelope::Message;

use crate::SEND_BUFFER_SIZE;
use crate::broadcast::PeerRegistry;
use crate::handler::ServiceHandler;

/// Handle for sending frames to one connected peer.
///
/// Cloneable and cheap. Handlers keep a clone to reply from offloaded
/// tasks after the dispatch call returned.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends an envelope as JSON text.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping frame");
            SendError
        })
    }

    /// Sends an error reply for the given request.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Returns `true` while the peer's send channel is open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(tx: mpsc::Sender<WsMessage>) -> Self {
        Self { tx }
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Runs the read and write pumps for one upgraded peer connection.
///
/// The connection registers itself with `peers` for broadcast fan-out and
/// unregisters when the read pump exits. The pumps stop when the peer
/// closes, the pong deadline lapses, or `server_cancel` fires.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    peer_addr: String,
    handler: Arc<H>,
    peers: PeerRegistry,
    server_cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: ServiceHandler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };
    let peer_id = peers.register(sender.clone());

    let (ws_sink, ws_source) = ws_stream.split();

    let write_cancel = cancel.clone();
    tokio::spawn(write_pump(ws_sink, rx, write_cancel));

    tokio::spawn(async move {
        read_pump(ws_source, sender, handler.clone(), cancel.clone()).await;
        // When the read pump exits, tear the write pump down too.
        cancel.cancel();
        peers.unregister(peer_id);
        handler.on_peer_disconnected().await;
        tracing::info!(peer = %peer_addr, "peer disconnected");
    });
}

/// Write pump: drains the send channel and emits keepalive pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame so peers observe disappearance promptly.
    let _ = sink.close().await;
}

/// Read pump: reads frames and dispatches envelopes to the handler.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: ServiceHandler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !got_pong {
                    tracing::warn!("pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!(
                                        "frame exceeds max size ({} > {WS_MAX_MESSAGE_SIZE})",
                                        text.len()
                                    );
                                    continue;
                                }
                                got_pong = true;
                                dispatch(&handler, &sender, &text).await;
                            }
                            WsMessage::Pong(_) => {
                                got_pong = true;
                                pong_deadline.reset();
                            }
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Close(_) => {
                                tracing::info!("received close frame");
                                break;
                            }
                            _ => {} // Binary and raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Routes one parsed envelope to the matching vtable method.
async fn dispatch<H: ServiceHandler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid envelope JSON: {e}");
            return;
        }
    };

    let s = sender.clone();
    match msg.member {
        Member::SetTestBool => handler.on_set_test_bool(s, msg).await,
        Member::SetTestInt => handler.on_set_test_int(s, msg).await,
        Member::SetTestDouble => handler.on_set_test_double(s, msg).await,
        Member::SetTestString => handler.on_set_test_string(s, msg).await,
        Member::SetTestInfo => handler.on_set_test_info(s, msg).await,
        Member::GetTestBool => handler.on_get_test_bool(s, msg).await,
        Member::GetTestInt => handler.on_get_test_int(s, msg).await,
        Member::GetTestDouble => handler.on_get_test_double(s, msg).await,
        Member::GetTestString => handler.on_get_test_string(s, msg).await,
        Member::GetTestInfo => handler.on_get_test_info(s, msg).await,
        Member::SendFileChunk => handler.on_send_file_chunk(s, msg).await,
        Member::GetTransferStatus => handler.on_get_transfer_status(s, msg).await,
        Member::GetMissingChunks => handler.on_get_missing_chunks(s, msg).await,
        Member::MethodReturn | Member::Error => {
            tracing::warn!(id = %msg.id, "reply frame received on the server side, dropping");
        }
        other if other.is_signal() => {
            let _ = sender.send_error(&msg, ERR_BAD_REQUEST, "signals cannot be called");
        }
        _ => {
            tracing::warn!(member = ?msg.member, "unhandled member");
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "unknown member");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_error_display() {
        let err = SendError;
        assert!(err.to_string().contains("buffer full"));
    }

    #[tokio::test]
    async fn sender_reports_closed_channel() {
        let (tx, rx) = mpsc::channel::<WsMessage>(1);
        let sender = Sender { tx };
        assert!(sender.is_connected());
        drop(rx);
        assert!(!sender.is_connected());
    }
}
