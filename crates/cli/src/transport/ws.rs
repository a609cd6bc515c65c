// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal WebSocket gateway: one browser terminal per connection.
//!
//! Inbound `start-session`, `stdin`, `resize`, and `end` frames drive a
//! [`ClientConnection`]; its `stdout` and `process-exit` events go back out.
//! Closing the socket ends the client's session the same way `end` does.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{code_of, ErrorCode};
use crate::pty::TermSize;
use crate::session::ClientConnection;
use crate::transport::state::AppState;
use crate::transport::ws_msg::{ClientMessage, ServerMessage};

/// Close reason sent when terminal access is turned off.
pub const REASON_DISABLED: &str = "terminal disabled";
/// Close reason sent when the shared session is torn down under the client.
pub const REASON_DESTROYED: &str = "session destroyed";
/// Close reason sent when a client fell too far behind the shared output.
pub const REASON_OVERRUN: &str = "output overrun";

/// WebSocket upgrade handler for `/platform-tools/terminal`.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Per-connection event loop.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if !state.manager.settings().enabled {
        info!("refusing terminal connection: terminal access is disabled");
        let _ = send_close(&mut ws_tx, close_code::POLICY, REASON_DISABLED).await;
        return;
    }

    let mut client = state.manager.connect();
    state.ws_client_count.fetch_add(1, Ordering::Relaxed);
    debug!(client = %client.id(), "terminal client connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = send_close(&mut ws_tx, close_code::AWAY, "server shutting down").await;
                break;
            }
            event = client.recv() => {
                let Some(event) = event else {
                    // Dropped by the session without an exit.
                    let (code, reason) = if state.manager.has_persistent_session() {
                        (close_code::AGAIN, REASON_OVERRUN)
                    } else {
                        (close_code::NORMAL, REASON_DESTROYED)
                    };
                    let _ = send_close(&mut ws_tx, code, reason).await;
                    break;
                };
                if send_json(&mut ws_tx, &ServerMessage::from(event)).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(&state, &mut client, client_msg)
                            }
                            Err(e) => {
                                debug!(client = %client.id(), "unparsable terminal message: {e}");
                                Some(ServerMessage::error(ErrorCode::BadRequest, "invalid message"))
                            }
                        };
                        if let Some(reply) = reply {
                            if send_json(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    // Cleanup
    debug!(client = %client.id(), typed = client.has_typed(), "terminal client disconnected");
    drop(client);
    state.ws_client_count.fetch_sub(1, Ordering::Relaxed);
}

/// Apply one client message and optionally return a reply.
fn handle_client_message(
    state: &AppState,
    client: &mut ClientConnection,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::StartSession { cols, rows } => {
            let size =
                ClientMessage::requested_size(cols, rows, state.manager.settings().default_size);
            match client.start(size) {
                Ok(()) => None,
                Err(e) => {
                    warn!(client = %client.id(), "start-session failed: {e:#}");
                    Some(ServerMessage::error(code_of(&e), e.to_string()))
                }
            }
        }
        ClientMessage::Stdin(data) => {
            client.stdin(&data);
            None
        }
        ClientMessage::Resize { cols, rows } => match client.resize(TermSize::new(cols, rows)) {
            Ok(()) => None,
            Err(e) => Some(ServerMessage::error(code_of(&e), e.to_string())),
        },
        ClientMessage::End => {
            client.end();
            None
        }
    }
}

/// Serialize and send a message over the WebSocket.
async fn send_json<S>(tx: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn send_close<S>(tx: &mut S, code: u16, reason: &str) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let frame = CloseFrame { code, reason: reason.to_owned().into() };
    tx.send(Message::Close(Some(frame))).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
