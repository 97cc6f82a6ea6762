use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use growroom_api::transport::decode;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::MockBackend;

pub fn websocket_router(backend: MockBackend) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(backend)
}

async fn ws_handler(ws: WebSocketUpgrade, State(backend): State<MockBackend>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, backend))
}

async fn handle_websocket(socket: WebSocket, backend: MockBackend) {
    let client_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<WsMessage>();

    backend.register(client_id, client_tx.clone()).await;

    tracing::info!("WebSocket client {} connected", client_id);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => match decode(&text) {
                Ok(envelope) => {
                    for frame in backend.handle(envelope).await {
                        if client_tx.send(WsMessage::Text(frame)).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to decode frame from {}: {}", client_id, e);
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("WebSocket client {} closed", client_id);
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error for client {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    backend.unregister(client_id).await;

    tracing::info!("WebSocket client {} disconnected", client_id);
}
