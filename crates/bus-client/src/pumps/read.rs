//! Read pump — routes method returns to pending calls and signals to
//! subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunkbus_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use chunkbus_protocol::envelope::Message;

use crate::ws_client::{CloseCallback, SignalRegistry};

/// Reads frames from the socket and dispatches them.
///
/// A read deadline detects dead connections: any incoming frame resets
/// the timer, and silence past [`WS_PONG_WAIT`] closes the connection
/// with the peer-vanished flag set.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
    signals: SignalRegistry,
    on_close: CloseCallback,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let mut peer_vanished = false;

    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("read deadline lapsed, connection dead");
                peer_vanished = true;
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_frame(text.as_str(), &pending, &signals).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                peer_vanished = true;
                                break;
                            }
                            _ => {} // Binary and raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        warn!("read error: {e}");
                        peer_vanished = true;
                        break;
                    }
                    None => {
                        debug!("stream ended");
                        peer_vanished = true;
                        break;
                    }
                }
            }
        }
    }

    if let Some(cb) = on_close.lock().await.as_ref() {
        cb(peer_vanished);
    }
}

/// Routes one text frame: method returns and errors go to the matching
/// pending call; signal frames go to every registered subscriber.
async fn handle_text_frame(
    text: &str,
    pending: &Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
    signals: &SignalRegistry,
) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("frame too large ({} bytes), dropping", text.len());
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse envelope: {e}");
            return;
        }
    };

    trace!(member = ?msg.member, id = %msg.id, "frame");

    if msg.member.is_signal() {
        // Subscribers run on this pump; the clone keeps the registry lock
        // out of user code.
        let handlers: Vec<_> = signals
            .lock()
            .unwrap()
            .get(&msg.member)
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(msg.clone());
        }
        return;
    }

    let mut map = pending.lock().await;
    if let Some(tx) = map.remove(&msg.id) {
        let _ = tx.send(msg);
    } else {
        warn!(member = ?msg.member, id = %msg.id, "reply with no pending call, dropping");
    }
}
