use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use crate::providers::random::RandomImpl;
use futures_util::Stream;
use log::debug;
use log::info;
use tokio_stream::StreamExt;

/// Pumps text frames to the client until either side finishes. Returning
/// drops `frames`, which tears down the session behind it.
pub(super) async fn forward_frames<S>(mut socket: WebSocket, frames: S, label: String)
where
    S: Stream<Item = String> + Send + 'static,
{
    let session = RandomImpl::session_id();
    info!("ws {} opened: {}", session, label);
    let mut frames = Box::pin(frames);

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(text) => {
                    if let Err(err) = socket.send(Message::Text(text)).await {
                        debug!("ws {} send failed: {}", session, err);
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("ws {} closed", session);
    let _ = socket.close().await;
}
