//! Chat-completions façade.
//!
//! `POST /v1/chat/completions` with the widely adopted request shape.
//! A model string of the form `"agentgate:<agentId>"` selects an agent;
//! the `user` field hashes to a stable session key (stateless requests
//! get an ephemeral session). `stream: true` answers with server-sent
//! events terminated by `data: [DONE]`.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use ag_domain::config::{PeerKind, RoutePeer};
use ag_protocol::{ChatSendParams, GatewayEvent};
use ag_sessions::{resolve_route, RouteRequest};

use crate::runtime;
use crate::state::AppState;

/// Channel name façade sessions route under.
const FACADE_CHANNEL: &str = "openai";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<InboundChatMessage>,
    #[serde(default)]
    pub stream: bool,
    /// Stable session routing handle.
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<serde_json::Value>,
}

/// `"agentgate:<agentId>"` selects an agent; anything else falls back
/// to the configured default.
fn parse_agent_id(model: &str, default_agent: &str) -> String {
    model
        .strip_prefix("agentgate:")
        .map(str::to_owned)
        .unwrap_or_else(|| default_agent.to_owned())
}

/// Stable peer ID for a `user` value: first 16 hex chars of SHA-256.
fn facade_peer(user: Option<&str>) -> RoutePeer {
    let id = match user {
        Some(user) if !user.is_empty() => {
            let digest = Sha256::digest(user.as_bytes());
            hex::encode(digest)[..16].to_string()
        }
        _ => "ephemeral".to_string(),
    };
    RoutePeer {
        kind: PeerKind::Dm,
        id,
    }
}

fn last_user_content(messages: &[InboundChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
}

fn error_response(e: &ag_domain::Error) -> Response {
    let status = match e {
        ag_domain::Error::Unauthenticated(_) | ag_domain::Error::Unauthorized(_) => {
            axum::http::StatusCode::UNAUTHORIZED
        }
        ag_domain::Error::Protocol(_) => axum::http::StatusCode::BAD_REQUEST,
        ag_domain::Error::LockTimeout(_) => axum::http::StatusCode::TOO_MANY_REQUESTS,
        _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": { "code": e.code(), "message": e.to_string() } })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    let config = state.config.get();
    let agent_id = parse_agent_id(&req.model, &config.sessions.default_agent);
    let peer = facade_peer(req.user.as_deref());

    let Some(message) = last_user_content(&req.messages) else {
        return error_response(&ag_domain::Error::Protocol(
            "no user message in request".into(),
        ));
    };

    // Unknown sessions are rejected unless auto-create is enabled
    // (config flag or the AG_AUTO_CREATE_SESSIONS env toggle).
    let auto_create = config.auth.auto_create_sessions
        || std::env::var("AG_AUTO_CREATE_SESSIONS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    if !auto_create {
        let route = resolve_route(
            &config.sessions,
            &RouteRequest {
                channel: FACADE_CHANNEL.into(),
                peer: Some(peer.clone()),
                ..RouteRequest::default()
            },
        );
        if state.sessions.get(&route.session_key).is_none() {
            return error_response(&ag_domain::Error::Unauthorized(format!(
                "unknown session for user (auto-create disabled); create it first via session.create (agent {agent_id})"
            )));
        }
    }

    let params = ChatSendParams {
        channel: FACADE_CHANNEL.into(),
        account_id: None,
        peer: Some(peer),
        parent_peer: None,
        guild_id: None,
        team_id: None,
        message,
        idempotency_key: None,
        model: None,
    };

    let completion_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();
    let model = req.model.clone();

    if req.stream {
        stream_completion(state, params, completion_id, created, model).into_response()
    } else {
        match runtime::handle_chat_send(&state, params).await {
            Ok(payload) => {
                let text = payload["text"].as_str().unwrap_or_default().to_owned();
                Json(ChatCompletionResponse {
                    id: completion_id,
                    object: "chat.completion",
                    created,
                    model,
                    choices: vec![serde_json::json!({
                        "index": 0,
                        "message": { "role": "assistant", "content": text },
                        "finish_reason": "stop",
                    })],
                })
                .into_response()
            }
            Err(e) => error_response(&e),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn chunk(id: &str, created: i64, model: &str, delta: serde_json::Value, finish: Option<&str>) -> Event {
    let body = serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish }],
    });
    Event::default().data(body.to_string())
}

fn stream_completion(
    state: AppState,
    params: ChatSendParams,
    completion_id: String,
    created: i64,
    model: String,
) -> Sse<impl futures_core::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tap_tx, mut tap_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let turn = tokio::spawn(async move {
        runtime::handle_chat_send_tapped(&state, params, Some(tap_tx)).await
    });

    let stream = async_stream::stream! {
        yield Ok(chunk(
            &completion_id,
            created,
            &model,
            serde_json::json!({ "role": "assistant" }),
            None,
        ));

        let mut streamed_any = false;
        while let Some(event) = tap_rx.recv().await {
            if let GatewayEvent::BlockReply { text, .. } = event {
                streamed_any = true;
                yield Ok(chunk(
                    &completion_id,
                    created,
                    &model,
                    serde_json::json!({ "content": text }),
                    None,
                ));
            }
        }

        match turn.await {
            Ok(Ok(payload)) => {
                // Clients that saw no deltas (message_end block mode)
                // still get the full text.
                if !streamed_any {
                    let text = payload["text"].as_str().unwrap_or_default();
                    if !text.is_empty() {
                        yield Ok(chunk(
                            &completion_id,
                            created,
                            &model,
                            serde_json::json!({ "content": text }),
                            None,
                        ));
                    }
                }
                yield Ok(chunk(&completion_id, created, &model, serde_json::json!({}), Some("stop")));
            }
            Ok(Err(e)) => {
                yield Ok(chunk(
                    &completion_id,
                    created,
                    &model,
                    serde_json::json!({ "content": format!("[error: {e}]") }),
                    Some("stop"),
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "streaming turn task failed");
                yield Ok(chunk(&completion_id, created, &model, serde_json::json!({}), Some("stop")));
            }
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
