//! The gateway WebSocket endpoint.
//!
//! Flow:
//! 1. Client connects to `/gateway?token=…` (or sends a bearer header).
//! 2. Authentication binds the connection to a principal; failures in
//!    this handshake window close the connection.
//! 3. The server sends the hello event before anything else, then the
//!    best-effort replay when `lastSeq` was supplied.
//! 4. Frame loop: requests dispatch concurrently and answer through the
//!    per-connection outbound serializer; a malformed frame produces a
//!    `protocol.error` event and closes the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use ag_protocol::{Frame, GatewayEvent, HelloPayload, PresenceKind, Role, PROTOCOL_VERSION};

use crate::auth::authenticate;
use crate::dispatch;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Credential: the static gateway secret or a device token.
    pub token: Option<String>,
    /// Last broadcast sequence seen; requests catch-up replay.
    #[serde(rename = "lastSeq")]
    pub last_seq: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /gateway — upgrade to WebSocket.
pub async fn gateway_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let credential = query.token.clone().or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(String::from)
    });

    let auth = match authenticate(&state, credential.as_deref()) {
        Ok(auth) => auth,
        Err(e) => {
            tracing::warn!(error = %e, "connection rejected in handshake window");
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "error": { "code": e.code(), "message": e.to_string() } })),
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, auth, query.last_seq))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    auth: ag_protocol::AuthInfo,
    last_seq: Option<u64>,
) {
    let (ws_sink, ws_stream) = socket.split();
    let conn_id = uuid::Uuid::new_v4().to_string();

    let device_id = auth.device_token.as_deref().and_then(|token| {
        state.tokens.validate(token).map(|t| t.device_id)
    });

    let (handle, mut outbound_rx) = state.connections.prepare(
        &conn_id,
        auth.role,
        auth.scopes.clone(),
        device_id.clone(),
    );

    // Presence: the principal id is the device when known.
    let presence_id = device_id.unwrap_or_else(|| conn_id.clone());
    let presence_kind = match auth.role {
        Role::Operator => PresenceKind::Client,
        Role::Node => PresenceKind::Node,
    };
    let snapshot = state.presence.register(
        &presence_id,
        presence_kind,
        env!("CARGO_PKG_VERSION"),
        serde_json::Value::Null,
    );

    // The hello is the first frame on the connection; only then does the
    // membership change broadcast to everyone (this connection included).
    let hello = GatewayEvent::Hello(HelloPayload {
        conn_id: conn_id.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
        protocol_version: PROTOCOL_VERSION,
        capabilities: state.capabilities(),
        presence: snapshot.clone(),
        auth,
    });
    if !handle.send(hello.into_frame(None, None)) {
        state.presence.unregister(&presence_id);
        return;
    }

    // Best-effort catch-up replay, still before any live broadcast.
    if let Some(last) = last_seq {
        for frame in state.connections.replay_since(last) {
            if !handle.send(frame) {
                break;
            }
        }
    }

    // Only now does the connection start receiving broadcasts.
    state.connections.attach(handle.clone());
    let version = snapshot.state_version;
    state
        .connections
        .broadcast(GatewayEvent::PresenceUpdate(snapshot), Some(version));

    tracing::info!(
        conn_id = %conn_id,
        role = handle.role.as_str(),
        "connection established"
    );

    // Writer task: the per-connection outbound serializer.
    let writer = tokio::spawn(async move {
        let mut sink: SplitSink<WebSocket, Message> = ws_sink;
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    read_loop(&state, &handle, ws_stream).await;

    // Cleanup: fail in-flight node requests, drop presence, unregister.
    writer.abort();
    let failed = state.node_invoker.fail_pending_for(&conn_id);
    state.connections.remove(&conn_id);
    if let Some(snapshot) = state.presence.unregister(&presence_id) {
        let version = snapshot.state_version;
        state
            .connections
            .broadcast(GatewayEvent::PresenceUpdate(snapshot), Some(version));
    }
    tracing::info!(
        conn_id = %conn_id,
        failed_in_flight = failed,
        "connection closed"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop(
    state: &AppState,
    handle: &std::sync::Arc<crate::ws::ConnectionHandle>,
    mut ws_stream: SplitStream<WebSocket>,
) {
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let frame = match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // Never half-process a frame: report and close.
                        tracing::warn!(conn_id = %handle.conn_id, error = %e, "malformed frame — closing");
                        handle.send(
                            GatewayEvent::ProtocolError {
                                message: format!("malformed frame: {e}"),
                            }
                            .into_frame(None, None),
                        );
                        return;
                    }
                };

                match frame {
                    Frame::Req { id, method, params } => {
                        // Dispatch concurrently so a long turn does not
                        // starve this connection's other requests
                        // (responses still serialize via the writer).
                        let state = state.clone();
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            let response =
                                match dispatch::dispatch(&state, &handle, &method, params).await {
                                    Ok(payload) => Frame::ok(id, payload),
                                    Err(e) => Frame::err(id, &e),
                                };
                            handle.send(response);
                        });
                    }
                    Frame::Res { id, .. } => {
                        tracing::debug!(conn_id = %handle.conn_id, id = %id, "ignoring response frame from client");
                    }
                    Frame::Event { event, .. } => {
                        tracing::debug!(conn_id = %handle.conn_id, event = %event, "ignoring event frame from client");
                    }
                }
            }
            Message::Close(_) => return,
            // axum answers WS-level pings itself.
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
    }
}
