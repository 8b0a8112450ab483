//! Observer push channel
//!
//! Each connection gets its own loop that forwards broadcast envelopes,
//! answers pings, and hands text frames to the hub.

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::hub::{Hub, shutdown_requested};

/// Upgrade handler for `GET /`
pub(super) async fn websocket_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| handle_observer(socket, hub))
}

async fn handle_observer(mut socket: WebSocket, hub: Hub) {
    let mut observer = match hub.observer_joined().await {
        Ok(observer) => observer,
        Err(e) => {
            warn!(error = %e, "Refusing observer");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let observer_id = observer.id();
    let mut shutdown = hub.shutdown_signal();

    loop {
        tokio::select! {
            outbound = observer.recv() => {
                let Some(text) = outbound else {
                    debug!(%observer_id, "Broadcast channel closed");
                    break;
                };
                if let Err(e) = socket.send(Message::Text(text)).await {
                    debug!(%observer_id, error = %e, "Observer send failed");
                    break;
                }
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = hub.handle_observer_message(&text).await {
                            warn!(%observer_id, error = %e, "Observer message failed");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(%observer_id, ?frame, "Observer closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%observer_id, error = %e, "Observer socket error");
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown_requested(&mut shutdown) => {
                info!(%observer_id, "Closing observer for shutdown");
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "Server shutting down".into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }

    hub.observer_left(observer);
}
