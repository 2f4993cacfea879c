//! Live request feed
//!
//! Streams request records to connected clients as they happen. A slow client
//! drops records rather than backing up the gateway.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::WS_BUFFER_SIZE;
use crate::api::server::AppState;
use crate::models::RequestRecord;

/// WebSocket handler for the live request feed
pub async fn live_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_ws(socket, state))
}

async fn handle_live_ws(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<RequestRecord>(WS_BUFFER_SIZE);

    info!("Live feed client connected");

    let mut feed_rx = state.logger.subscribe();

    // Decouple the broadcast from the socket through a bounded per-client
    // buffer. When the socket is slow this task stalls and the per-client
    // broadcast receiver lags, dropping records for this client only.
    let mut forward_task = tokio::spawn(async move {
        loop {
            match feed_rx.recv().await {
                Ok(record) => {
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(missed = n, "Live feed client fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let payload = match serde_json::to_string(&record) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize request record: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // The client side only ever sends close (and pings, answered by axum)
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears the rest down
    tokio::select! {
        _ = &mut forward_task => {}
        _ = &mut send_task => {}
        _ = &mut recv_task => {}
    }
    forward_task.abort();
    send_task.abort();
    recv_task.abort();

    debug!("Live feed client disconnected");
}
