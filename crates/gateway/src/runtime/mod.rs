//! The per-turn runtime: dedupe, routing, locking, pruning, the turn
//! runner, and the subscriber fan-out.

pub mod approval;
pub mod cancel;
pub mod dedupe;
pub mod executor;
pub mod extensions;
pub mod heartbeat;
pub mod node_invoke;
pub mod session_lock;
pub mod subscriber;
pub mod tools;
pub mod turn;

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use ag_domain::config::Config;
use ag_domain::error::{Error, Result};
use ag_domain::message::{now_ms, Message};
use ag_domain::trace::TraceEvent;
use ag_protocol::{ChatSendParams, ErrorShape, GatewayEvent};
use ag_sessions::{build_main_session_key, resolve_route, RouteRequest, SessionInit};

use crate::pruning::prune_context_messages;
use crate::state::AppState;
use session_lock::acquire_session_write_lock;
use subscriber::TurnSubscriber;
use turn::{run_turn, TurnInput};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// chat.send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle a `chat.send` request: dedupe → route → lock → prune → turn →
/// transcript → dedupe store.
pub async fn handle_chat_send(state: &AppState, params: ChatSendParams) -> Result<Value> {
    handle_chat_send_tapped(state, params, None).await
}

/// Same as [`handle_chat_send`] with an optional tap receiving the
/// turn's subscriber events (used by the SSE façade).
pub async fn handle_chat_send_tapped(
    state: &AppState,
    params: ChatSendParams,
    tap: Option<mpsc::UnboundedSender<GatewayEvent>>,
) -> Result<Value> {
    let dedupe_key = params
        .idempotency_key
        .as_deref()
        .map(|k| format!("chat:{k}"));

    if let Some(cached) = check_dedupe(state, dedupe_key.as_deref()) {
        return cached;
    }

    state.heartbeats.reset(&params.channel.to_lowercase());

    let config = state.config.get();
    let route = resolve_route(
        &config.sessions,
        &RouteRequest {
            channel: params.channel.clone(),
            account_id: params.account_id.clone(),
            peer: params.peer.clone(),
            parent_peer: params.parent_peer.clone(),
            guild_id: params.guild_id.clone(),
            team_id: params.team_id.clone(),
        },
    );

    let init = SessionInit {
        agent_id: route.agent_id.clone(),
        channel: route.channel.clone(),
        account_id: route.account_id.clone(),
        peer: params.peer.clone(),
    };

    let outcome = run_session_turn(
        state,
        &config,
        &route.session_key,
        init,
        &params.message,
        params.model.as_deref(),
        tap,
    )
    .await;

    settle_dedupe(state, dedupe_key.as_deref(), outcome)
}

/// Handle an `agent.run` request: an explicit agent turn on its main
/// (or a named) session, bypassing the binding hierarchy.
pub async fn handle_agent_run(
    state: &AppState,
    params: ag_protocol::AgentRunParams,
) -> Result<Value> {
    let dedupe_key = params
        .idempotency_key
        .as_deref()
        .map(|k| format!("agent:{k}"));

    if let Some(cached) = check_dedupe(state, dedupe_key.as_deref()) {
        return cached;
    }

    let config = state.config.get();
    let session_key = params
        .session_key
        .clone()
        .unwrap_or_else(|| build_main_session_key(&params.agent_id));

    let init = SessionInit {
        agent_id: params.agent_id.to_lowercase(),
        channel: String::new(),
        account_id: String::new(),
        peer: None,
    };

    let outcome = run_session_turn(
        state,
        &config,
        &session_key,
        init,
        &params.message,
        params.model.as_deref(),
        None,
    )
    .await;

    settle_dedupe(state, dedupe_key.as_deref(), outcome)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The shared turn path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_session_turn(
    state: &AppState,
    config: &Config,
    session_key: &str,
    init: SessionInit,
    user_message: &str,
    model_override: Option<&str>,
    tap: Option<mpsc::UnboundedSender<GatewayEvent>>,
) -> Result<Value> {
    let agent_id = init.agent_id.clone();
    let (entry, is_new) = state.sessions.resolve_or_create(session_key, init);
    if is_new {
        tracing::info!(session_key = %session_key, session_id = %entry.session_id, "session created");
        let _ = state.sessions.flush();
    }
    state.sessions.touch(session_key);

    // ── Serialize the turn against other writers ──────────────────
    let transcript_path = state.transcripts.path_for(session_key);
    let lock = acquire_session_write_lock(
        &transcript_path,
        Duration::from_millis(config.sessions.max_lock_hold_ms),
    )
    .await?;

    // ── Assemble the prompt ───────────────────────────────────────
    let history = state.transcripts.read(session_key)?;
    let pruned = prune_context_messages(&history, &config.pruning, now_ms());

    let mut messages = Vec::with_capacity(pruned.len() + 2);
    if !pruned.iter().any(|m| matches!(m, Message::System { .. })) {
        messages.push(Message::system(format!(
            "You are agent \"{agent_id}\" served by the agentgate gateway."
        )));
    }
    messages.extend(pruned);
    let user_msg = Message::user(user_message);
    messages.push(user_msg.clone());

    // The user turn is durable before the model runs.
    state
        .transcripts
        .append(session_key, std::slice::from_ref(&user_msg))?;

    // ── Resolve provider + model ──────────────────────────────────
    let effective = state.overrides.apply(
        session_key,
        &config.providers.default,
        config.providers.model.as_deref(),
    );
    let provider = state.providers.resolve(Some(&effective.provider))?;
    let model = model_override.map(String::from).or(effective.model);

    // ── Run the turn, fanning events out to subscribers ───────────
    let cancel = state.cancel_map.register(session_key);
    let stream = run_turn(
        state.clone(),
        TurnInput {
            session_key: session_key.to_owned(),
            messages,
            provider,
            model,
            think_level: effective.think_level,
            cancel,
        },
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    spawn_event_forwarder(state.clone(), event_rx, tap);

    let mut sub = TurnSubscriber::new(
        session_key,
        config.sessions.block_reply_mode,
        config.sessions.messaging_tools.clone(),
        event_tx,
    );

    let consumer_stream = stream.clone();
    let consumer = tokio::spawn(async move {
        let mut last_error = None;
        while let Some(event) = consumer_stream.next().await {
            if let ag_domain::event::AgentEvent::TurnError { message } = &event {
                last_error = Some(message.clone());
            }
            sub.handle_event(&event);
        }
        (sub, last_error)
    });

    let result = stream.result().await;
    let (sub, last_error) = consumer
        .await
        .map_err(|e| Error::Other(format!("subscriber task failed: {e}")))?;

    state.cancel_map.remove(session_key);

    let new_messages = match result {
        Some(messages) => messages,
        None => {
            drop(lock);
            return Err(Error::Provider(
                last_error.unwrap_or_else(|| "turn produced no result".into()),
            ));
        }
    };

    // ── Persist the turn ──────────────────────────────────────────
    state.transcripts.append(session_key, &new_messages)?;
    state.sessions.touch(session_key);
    let _ = state.sessions.flush();
    drop(lock);

    TraceEvent::TurnCompleted {
        session_key: session_key.to_owned(),
        new_messages: new_messages.len(),
    }
    .emit();
    state.connections.broadcast(
        GatewayEvent::TurnEnd {
            session_key: session_key.to_owned(),
            new_messages: new_messages.len(),
        },
        None,
    );

    Ok(serde_json::json!({
        "sessionKey": session_key,
        "sessionId": entry.session_id,
        "agentId": agent_id,
        "text": sub.assistant_text(),
        "newMessages": new_messages.len(),
    }))
}

/// Forward subscriber events to every connected operator, plus the
/// optional per-request tap.
fn spawn_event_forwarder(
    state: AppState,
    mut rx: mpsc::UnboundedReceiver<GatewayEvent>,
    tap: Option<mpsc::UnboundedSender<GatewayEvent>>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(tap) = &tap {
                let _ = tap.send(event.clone());
            }
            state.connections.broadcast(event, None);
        }
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dedupe plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cache hit short-circuits the operation with the prior outcome.
fn check_dedupe(state: &AppState, key: Option<&str>) -> Option<Result<Value>> {
    let key = key?;
    let entry = state.dedupe.get(key)?;
    TraceEvent::DedupeHit { key: key.to_owned() }.emit();
    Some(if entry.ok {
        Ok(entry.payload.unwrap_or(Value::Null))
    } else {
        Err(error_from_shape(entry.error.unwrap_or(ErrorShape {
            code: "internal".into(),
            message: "cached failure".into(),
        })))
    })
}

/// Record the outcome exactly once per (key, outcome) pair. Lock
/// timeouts, cancellations, and transcript failures are infrastructure
/// conditions, not outcomes — retries must re-run those.
fn settle_dedupe(state: &AppState, key: Option<&str>, outcome: Result<Value>) -> Result<Value> {
    if let Some(key) = key {
        match &outcome {
            Ok(payload) => state.dedupe.set(key, true, Some(payload.clone()), None),
            Err(e)
                if !matches!(
                    e,
                    Error::LockTimeout(_) | Error::Cancelled | Error::TranscriptWrite(_)
                ) =>
            {
                state.dedupe.set(key, false, None, Some(ErrorShape::from(e)));
            }
            Err(_) => {}
        }
    }
    outcome
}

/// Rehydrate a cached error into the matching error kind.
fn error_from_shape(shape: ErrorShape) -> Error {
    match shape.code.as_str() {
        "protocol_error" => Error::Protocol(shape.message),
        "unauthenticated" => Error::Unauthenticated(shape.message),
        "unauthorized" => Error::Unauthorized(shape.message),
        "lock_timeout" => Error::LockTimeout(shape.message),
        "approval_required" => Error::ApprovalRequired(shape.message),
        "tool_blocked" => Error::ToolBlocked(shape.message),
        "tool_execution_error" => Error::ToolExecution(shape.message),
        "transcript_write_failed" => Error::TranscriptWrite(shape.message),
        "provider_error" => Error::Provider(shape.message),
        "cancelled" => Error::Cancelled,
        "config_error" => Error::Config(shape.message),
        _ => Error::Other(shape.message),
    }
}
