//! `/ws/state`: pushes the dashboard view to a client on every change.

use crate::engine::EngineHandle;
use crate::store::DashboardView;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Handle WebSocket upgrade request
pub async fn ws_state(ws: WebSocketUpgrade, State(engine): State<EngineHandle>) -> Response {
    let client_id = format!("state_{}", uuid::Uuid::new_v4());
    let updates = engine.subscribe();
    ws.on_upgrade(move |socket: WebSocket| handle_connection(socket, updates, client_id))
}

/// Stream views until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    mut updates: watch::Receiver<DashboardView>,
    client_id: String,
) {
    info!("State stream client connected: {}", client_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let recv_client_id = client_id.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            // Current view first, then one frame per change
            let json = match serde_json::to_string(&*updates.borrow_and_update()) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize view: {}", e);
                    break;
                }
            };

            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                debug!("Failed to send view to WebSocket: {}", e);
                break;
            }

            if updates.changed().await.is_err() {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Close(_)) => {
                    info!("Client {} closed connection", recv_client_id);
                    break;
                }
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    warn!("State stream is read-only; ignoring frame from {}", recv_client_id);
                }
                Ok(_) => {
                    // Axum handles ping/pong automatically
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("State stream client disconnected: {}", client_id);
}
