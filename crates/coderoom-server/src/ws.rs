//! WebSocket endpoint for the session channel.
//!
//! Connecting -> Authenticating -> Joined -> Disconnected. The first text
//! frame is the join handshake. Once joined, a writer task drains the
//! connection's outbound queue while this task reads client frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use coderoom_core::wire::{Handshake, JoinFailure, ServerEvent};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{authenticate, merge_handshake};
use crate::relay::{handle_frame, Session};
use crate::rooms::Frame;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let fallback = Handshake {
        credential: bearer(&headers).or(params.token),
        project_id: params.project_id,
    };
    ws.on_upgrade(move |socket| handle_socket(state, socket, fallback))
}

/// Wait for the first text frame. `None` if the client went away first.
async fn first_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn reject(sink: &mut SplitSink<WebSocket, Message>, reason: JoinFailure) {
    info!(%reason, "join rejected");
    match (ServerEvent::JoinError { reason }).to_json() {
        Ok(json) => {
            let _ = sink.send(Message::Text(json)).await;
        }
        Err(e) => warn!(error = %e, "failed to encode join error"),
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn handle_socket(state: AppState, socket: WebSocket, fallback: Handshake) {
    let (mut sink, mut stream) = socket.split();

    let timeout = state.settings().handshake_timeout;
    let handshake = match tokio::time::timeout(timeout, first_text(&mut stream)).await {
        Ok(Some(text)) => {
            let frame: Handshake = serde_json::from_str(&text).unwrap_or_else(|e| {
                debug!(error = %e, "unreadable handshake frame");
                Handshake::default()
            });
            merge_handshake(frame, &fallback)
        }
        Ok(None) => {
            debug!("connection closed before handshake");
            return;
        }
        Err(_) => {
            reject(&mut sink, JoinFailure::NoToken).await;
            return;
        }
    };

    let (identity, project) =
        match authenticate(state.store().as_ref(), state.verifier(), &handshake).await {
            Ok(joined) => joined,
            Err(reason) => {
                reject(&mut sink, reason).await;
                return;
            }
        };

    let (tx, rx) = mpsc::channel(state.settings().outbound_buffer);
    let project_id = project.id;
    let connection_id = state
        .rooms()
        .join(project_id, identity.clone(), tx, project.file_tree);
    let session = Session {
        connection_id,
        project_id,
        identity,
    };

    let mut writer = tokio::spawn(write_frames(sink, rx));
    let reader = read_frames(&state, &session, stream);

    tokio::select! {
        _ = &mut writer => debug!(connection_id = %connection_id, "writer finished"),
        _ = reader => debug!(connection_id = %connection_id, "reader finished"),
    }

    // Dropping the registry's sender lets a still-running writer flush and close.
    state.rooms().leave(connection_id);
}

async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
            debug!(error = %e, "socket write failed");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_frames(state: &AppState, session: &Session, mut stream: SplitStream<WebSocket>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(state, session, &text).await,
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %session.connection_id, error = %e, "socket read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer(&headers).as_deref(), Some("abc"));
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);
    }

    #[test]
    fn test_ws_params() {
        let params: WsParams =
            serde_json::from_value(serde_json::json!({"token": "t", "projectId": "p"})).unwrap();
        assert_eq!(params.token.as_deref(), Some("t"));
        assert_eq!(params.project_id.as_deref(), Some("p"));
    }
}
