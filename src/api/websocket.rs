//! WebSocket handler for the live event stream

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(mut socket: WebSocket, state: ApiState) {
    let mut subscription = match state.hub.subscribe("websocket") {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("refusing observer: {e}");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    let observer = subscription.id();
    info!("observer {observer} connected");

    let (mut sender, mut receiver) = socket.split();
    let hub = state.hub.clone();

    // Spawn task to forward events to WebSocket
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else {
                        debug!("hub gone");
                        break;
                    };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("could not serialize {}: {e}", event.name());
                            continue;
                        }
                    };

                    if sender.send(Message::Text(text)).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }

                _ = hub.closed() => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "station shutting down".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Observers only listen; anything they send is ignored
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => {
                    // Pong is automatically sent by axum
                    debug!("Received ping");
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("observer {observer} disconnected");
}
