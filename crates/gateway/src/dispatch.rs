//! The request method table.
//!
//! Every `req` frame lands here; handlers deserialize `params` against
//! the typed shapes in `ag-protocol` and answer with a JSON payload.
//! Unknown methods and malformed params are protocol errors.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ag_domain::error::{Error, Result};
use ag_protocol::{
    ChatCancelParams, ChatSendParams, DevicePairParams, DeviceRevokeParams, DeviceRotateParams,
    NodeInvokeRequestParams, NodeInvokeResultParams, Role, SessionCreateParams,
    SessionHistoryParams, ToolsApproveParams, ToolsInvokeParams,
};
use ag_sessions::{resolve_route, RouteRequest, SessionInit};

use crate::runtime;
use crate::runtime::approval::ApprovalDecision;
use crate::runtime::node_invoke::NodeInvokeOutcome;
use crate::state::AppState;
use crate::ws::ConnectionHandle;

/// Methods served by the gateway, advertised in the hello capabilities.
pub const METHODS: &[&str] = &[
    "health",
    "session.create",
    "session.get_history",
    "chat.send",
    "chat.cancel",
    "agent.run",
    "tools.invoke",
    "tools.approve",
    "node.invoke.request",
    "node.invoke.result",
    "device.pair",
    "device.rotate",
    "device.revoke",
    "presence.list",
];

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::Protocol(format!("invalid params: {e}")))
}

/// Operator-only methods reject node principals.
fn require_operator(conn: &ConnectionHandle) -> Result<()> {
    if conn.role != Role::Operator {
        return Err(Error::Unauthorized("operator role required".into()));
    }
    Ok(())
}

pub async fn dispatch(
    state: &AppState,
    conn: &ConnectionHandle,
    method: &str,
    params: Value,
) -> Result<Value> {
    match method {
        "health" => handle_health(state),
        "session.create" => {
            require_operator(conn)?;
            handle_session_create(state, parse(params)?)
        }
        "session.get_history" => {
            require_operator(conn)?;
            handle_session_history(state, parse(params)?)
        }
        "chat.send" => {
            require_operator(conn)?;
            runtime::handle_chat_send(state, parse::<ChatSendParams>(params)?).await
        }
        "chat.cancel" => {
            require_operator(conn)?;
            let p: ChatCancelParams = parse(params)?;
            Ok(serde_json::json!({ "cancelled": state.cancel_map.cancel(&p.session_key) }))
        }
        "agent.run" => {
            require_operator(conn)?;
            runtime::handle_agent_run(state, parse(params)?).await
        }
        "tools.invoke" => {
            require_operator(conn)?;
            handle_tools_invoke(state, parse(params)?).await
        }
        "tools.approve" => {
            require_operator(conn)?;
            handle_tools_approve(state, parse(params)?)
        }
        "node.invoke.request" => {
            require_operator(conn)?;
            handle_node_invoke_request(state, parse(params)?).await
        }
        "node.invoke.result" => handle_node_invoke_result(state, conn, parse(params)?),
        "device.pair" => {
            require_operator(conn)?;
            handle_device_pair(state, parse(params)?)
        }
        "device.rotate" => {
            require_operator(conn)?;
            let p: DeviceRotateParams = parse(params)?;
            let token = state.tokens.rotate(&p.device_id)?;
            Ok(serde_json::to_value(token)?)
        }
        "device.revoke" => {
            require_operator(conn)?;
            let p: DeviceRevokeParams = parse(params)?;
            Ok(serde_json::json!({ "revoked": state.tokens.revoke(&p.token)? }))
        }
        "presence.list" => Ok(serde_json::to_value(state.presence.snapshot())?),
        other => Err(Error::Protocol(format!("unknown method: {other}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn handle_health(state: &AppState) -> Result<Value> {
    let skills = state.skills.clone();
    Ok(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
        "connections": state.connections.count(),
        "presence_version": state.presence.state_version(),
        "skills": {
            "eligible": skills.eligible().iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            "ineligible": skills.ineligible(),
        },
    }))
}

fn handle_session_create(state: &AppState, params: SessionCreateParams) -> Result<Value> {
    let config = state.config.get();
    let route = resolve_route(
        &config.sessions,
        &RouteRequest {
            channel: params.channel,
            account_id: params.account_id,
            peer: params.peer.clone(),
            parent_peer: None,
            guild_id: params.guild_id,
            team_id: params.team_id,
        },
    );

    let (entry, created) = state.sessions.resolve_or_create(
        &route.session_key,
        SessionInit {
            agent_id: route.agent_id.clone(),
            channel: route.channel.clone(),
            account_id: route.account_id.clone(),
            peer: params.peer,
        },
    );
    if created {
        let _ = state.sessions.flush();
    }

    Ok(serde_json::json!({
        "route": route,
        "sessionId": entry.session_id,
        "created": created,
    }))
}

fn handle_session_history(state: &AppState, params: SessionHistoryParams) -> Result<Value> {
    let mut messages = state.transcripts.read(&params.session_key)?;
    if let Some(limit) = params.limit {
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
    }
    Ok(serde_json::json!({
        "sessionKey": params.session_key,
        "messages": messages,
    }))
}

async fn handle_tools_invoke(state: &AppState, params: ToolsInvokeParams) -> Result<Value> {
    let call_id = format!("inv_{}", Uuid::new_v4().simple());
    let output = runtime::executor::invoke_tool(
        state,
        params.session_key.as_deref(),
        &params.tool,
        &call_id,
        params.params,
        &CancellationToken::new(),
        None,
    )
    .await?;

    Ok(serde_json::json!({
        "ok": true,
        "result": output.content,
        "details": output.details,
    }))
}

fn handle_tools_approve(state: &AppState, params: ToolsApproveParams) -> Result<Value> {
    let id = Uuid::parse_str(&params.id)
        .map_err(|e| Error::Protocol(format!("invalid approval id: {e}")))?;
    let decision = if params.approve {
        ApprovalDecision::Approved {
            sticky: params.sticky,
        }
    } else {
        ApprovalDecision::Denied {
            reason: params.reason,
        }
    };
    Ok(serde_json::json!({ "resolved": state.approvals.resolve(&id, decision) }))
}

async fn handle_node_invoke_request(
    state: &AppState,
    params: NodeInvokeRequestParams,
) -> Result<Value> {
    let conn = match &params.node_id {
        Some(id) => state
            .connections
            .get(id)
            .filter(|c| c.role == Role::Node)
            .ok_or_else(|| Error::ToolExecution(format!("node {id} not connected")))?,
        None => state
            .connections
            .find_node_for_tool(&params.tool)
            .ok_or_else(|| {
                Error::ToolExecution(format!("no node advertises tool {}", params.tool))
            })?,
    };

    let outcome = state
        .node_invoker
        .dispatch(
            &conn.conn_id,
            &params.tool,
            params.args,
            params.session_key,
            |event| conn.send(event.into_frame(None, None)),
        )
        .await?;

    Ok(serde_json::json!({
        "ok": outcome.success,
        "result": outcome.result,
        "error": outcome.error,
    }))
}

fn handle_node_invoke_result(
    state: &AppState,
    conn: &ConnectionHandle,
    params: NodeInvokeResultParams,
) -> Result<Value> {
    if conn.role != Role::Node {
        return Err(Error::Unauthorized("node role required".into()));
    }
    let accepted = state.node_invoker.complete(
        &params.request_id,
        NodeInvokeOutcome {
            success: params.success,
            result: params.result,
            error: params.error,
        },
    );
    Ok(serde_json::json!({ "accepted": accepted }))
}

fn handle_device_pair(state: &AppState, params: DevicePairParams) -> Result<Value> {
    let token = state.tokens.issue(
        &params.device_id,
        params.role,
        params.scopes,
        params.expires_in_days,
    )?;
    Ok(serde_json::to_value(token)?)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::test_state;

    fn operator_conn(state: &AppState) -> std::sync::Arc<ConnectionHandle> {
        let (handle, _rx) = state
            .connections
            .register("op-test", Role::Operator, vec!["*".into()], None);
        handle
    }

    fn node_conn(state: &AppState) -> std::sync::Arc<ConnectionHandle> {
        let (handle, _rx) =
            state
                .connections
                .register("node-test", Role::Node, vec!["tool:screen".into()], None);
        handle
    }

    #[tokio::test]
    async fn health_reports_basics() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);
        let payload = dispatch(&state, &conn, "health", Value::Null).await.unwrap();
        assert_eq!(payload["ok"], true);
        assert!(payload["version"].is_string());
    }

    #[tokio::test]
    async fn unknown_method_is_protocol_error() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);
        let err = dispatch(&state, &conn, "bogus.method", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "protocol_error");
    }

    #[tokio::test]
    async fn session_create_then_history() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);

        let created = dispatch(
            &state,
            &conn,
            "session.create",
            serde_json::json!({ "channel": "telegram", "peer": { "kind": "dm", "id": "1" } }),
        )
        .await
        .unwrap();
        assert_eq!(created["created"], true);
        let session_key = created["route"]["sessionKey"].as_str().unwrap().to_owned();

        let history = dispatch(
            &state,
            &conn,
            "session.get_history",
            serde_json::json!({ "sessionKey": session_key }),
        )
        .await
        .unwrap();
        assert_eq!(history["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn node_cannot_call_operator_methods() {
        let (_dir, state) = test_state();
        let conn = node_conn(&state);
        let err = dispatch(
            &state,
            &conn,
            "chat.send",
            serde_json::json!({ "channel": "x", "message": "hi" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn operator_cannot_post_node_results() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);
        let err = dispatch(
            &state,
            &conn,
            "node.invoke.result",
            serde_json::json!({ "requestId": "r1", "success": true }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn tools_invoke_runs_local_tool() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);
        let payload = dispatch(
            &state,
            &conn,
            "tools.invoke",
            serde_json::json!({ "tool": "echo", "params": { "text": "ping" } }),
        )
        .await
        .unwrap();
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["result"], "ping");
    }

    #[tokio::test]
    async fn device_pair_rotate_revoke_round_trip() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);

        let paired = dispatch(
            &state,
            &conn,
            "device.pair",
            serde_json::json!({ "deviceId": "phone", "role": "operator", "scopes": ["*"] }),
        )
        .await
        .unwrap();
        let token = paired["token"].as_str().unwrap().to_owned();

        let rotated = dispatch(
            &state,
            &conn,
            "device.rotate",
            serde_json::json!({ "deviceId": "phone" }),
        )
        .await
        .unwrap();
        assert_ne!(rotated["token"], token);

        let revoked = dispatch(
            &state,
            &conn,
            "device.revoke",
            serde_json::json!({ "token": rotated["token"] }),
        )
        .await
        .unwrap();
        assert_eq!(revoked["revoked"], true);
    }

    #[tokio::test]
    async fn malformed_params_are_protocol_errors() {
        let (_dir, state) = test_state();
        let conn = operator_conn(&state);
        let err = dispatch(
            &state,
            &conn,
            "chat.send",
            serde_json::json!({ "no_channel": true }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "protocol_error");
    }
}
