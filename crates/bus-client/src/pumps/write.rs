//! Write pump — drains the outbound frame channel into the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        let is_close = matches!(ws_msg, tungstenite::Message::Close(_));
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::warn!("write pump send error: {e}");
                            break;
                        }
                        if is_close {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = sink.close().await;
}
