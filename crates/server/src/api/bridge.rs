//! WebSocket endpoint for the browser shim.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use modreport_core::{ClientFrame, ServerFrame};

use crate::metrics::{
    BRIDGE_CONNECTIONS_ACTIVE, BRIDGE_CONNECTIONS_TOTAL, BRIDGE_FRAMES, BRIDGE_INVALID_FRAMES,
};
use crate::state::AppState;

fn server_frame_type(frame: &ServerFrame) -> &'static str {
    match frame {
        ServerFrame::Command { .. } => "command",
        ServerFrame::PageReply { .. } => "page_reply",
    }
}

fn client_frame_type(frame: &ClientFrame) -> &'static str {
    match frame {
        ClientFrame::PageMessage { .. } => "page_message",
        ClientFrame::TabUpdated(_) => "tab_updated",
        ClientFrame::CommandResult { .. } => "command_result",
    }
}

/// WebSocket upgrade handler.
pub async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle one shim connection until it closes or is replaced.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let bridge = Arc::clone(state.bridge());
    let connection = bridge.attach().await;
    let connection_id = connection.id;
    let outbound = connection.outbound;
    let mut frames = connection.frames;

    BRIDGE_CONNECTIONS_TOTAL.inc();
    BRIDGE_CONNECTIONS_ACTIVE.inc();

    info!(connection = connection_id, "Browser shim connected");

    // Forward commands and page replies to the shim
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            BRIDGE_FRAMES
                .with_label_values(&["out", server_frame_type(&frame)])
                .inc();

            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("Bridge send failed, shim disconnected");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize bridge frame: {}", e);
                }
            }
        }
    });

    // Handle frames from the shim
    while let Some(result) = receiver.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Browser shim requested close");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Bridge receive error: {}", e);
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                BRIDGE_INVALID_FRAMES.inc();
                warn!("Ignoring invalid bridge frame: {}", e);
                continue;
            }
        };
        BRIDGE_FRAMES
            .with_label_values(&["in", client_frame_type(&frame)])
            .inc();

        match frame {
            ClientFrame::TabUpdated(update) => bridge.publish_update(update),
            ClientFrame::CommandResult {
                command_id,
                ok,
                data,
                error,
            } => bridge.complete_command(command_id, ok, data, error),
            ClientFrame::PageMessage {
                request_id,
                sender,
                message,
            } => {
                // Reports take seconds; keep reading tab updates meanwhile.
                let router = Arc::clone(state.router());
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let result = router
                        .dispatch(message, sender)
                        .await
                        .map_err(|e| e.to_string());
                    if let Err(e) = &result {
                        warn!(request_id = %request_id, "Page message failed: {}", e);
                    }
                    if outbound
                        .send(ServerFrame::page_reply(request_id, result))
                        .await
                        .is_err()
                    {
                        debug!("Shim gone before page reply could be sent");
                    }
                });
            }
        }
    }

    // Clean up
    send_task.abort();
    bridge.detach(connection_id).await;
    BRIDGE_CONNECTIONS_ACTIVE.dec();
    info!(connection = connection_id, "Browser shim disconnected");
}
