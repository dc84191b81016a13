//! Viewer WebSocket endpoint
//!
//! One socket per viewer. Inbound frames become queued commands; the
//! session's outbound queue is drained onto the socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::{CommandQueue, ViewerCommand, ViewerEvent};
use crate::multiplexer::Multiplexer;

/// State shared by viewer sockets
#[derive(Clone)]
pub struct ViewerState {
    pub mux: Arc<Multiplexer>,
    pub commands: CommandQueue,
}

/// Upgrade `GET /ws/watchlist` to a viewer socket
pub async fn watchlist_socket(
    ws: WebSocketUpgrade,
    State(state): State<ViewerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ViewerState) {
    let (session, mut events) = state.mux.connect_session().await;
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize viewer event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mux = state.mux.clone();
    let commands = state.commands.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match ViewerCommand::from_json(&text) {
                    Ok(command) => {
                        if !commands.push(session, command) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(session = %session, error = %e, "Invalid viewer frame");
                        mux.notify(session, ViewerEvent::error(format!("Invalid message: {}", e)))
                            .await;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(session = %session, error = %e, "Viewer socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    state.mux.disconnect_session(session).await;
    info!(session = %session, "Viewer socket closed");
}
