//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::session::SessionInput;
use crate::util::rate_limit::ClientRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

const MAX_NAME_LEN: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name shown on the roster
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let name = display_name(query.name.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, name, state))
}

/// Trimmed, length-limited name, or a generated one
fn display_name(raw: Option<&str>) -> String {
    let name: String = raw
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if name.is_empty() {
        format!("Player_{}", &Uuid::new_v4().simple().to_string()[..8])
    } else {
        name
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, name: String, state: AppState) {
    let client = state.clients.register(&name);
    info!(client_id = %client, name = %name, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        client_id: client,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(client_id = %client, error = %e, "Failed to send welcome");
        state.clients.remove(&client);
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let feed_rx = state.session.subscribe();
    let input_tx = state.session.input_tx.clone();

    let connect = SessionInput::Connect {
        client,
        name,
        outbound: outbound_tx,
    };
    if input_tx.send(connect).await.is_err() {
        error!(client_id = %client, "Session is not running");
        state.clients.remove(&client);
        return;
    }

    run_session(client, ws_sink, ws_stream, input_tx, outbound_rx, feed_rx).await;

    state.clients.remove(&client);
    info!(client_id = %client, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    client: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<SessionInput>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    mut feed_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ClientRateLimiter::new();

    // Writer task: per-client replies and the shared feed -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                direct = outbound_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => {
                        debug!(client_id = %client, "Outbound channel closed");
                        break;
                    }
                },
                shared = feed_rx.recv() => match shared {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client_id = %client, lagged_count = n, "Client lagged, skipping {} feed messages", n);
                        // Continue - don't disconnect for lag
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(client_id = %client, "Feed channel closed");
                        break;
                    }
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(client_id = %client, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> session loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_command() {
                    warn!(client_id = %client, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if input_tx.send(SessionInput::Client { client, msg }).await.is_err() {
                            debug!(client_id = %client, "Input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(client_id = %client, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Free the seat
    let _ = input_tx.send(SessionInput::Disconnect { client }).await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_is_cleaned() {
        assert_eq!(display_name(Some("  alice  ")), "alice");
        assert_eq!(display_name(Some(&"x".repeat(40))).len(), MAX_NAME_LEN);
        assert!(display_name(None).starts_with("Player_"));
        assert!(display_name(Some("   ")).starts_with("Player_"));
    }
}
