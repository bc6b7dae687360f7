//! The wrapped tool invocation pipeline.
//!
//! Per call: emit `tool_call` hooks (a block fails the call), pass the
//! approval gate for dangerous command shapes, dispatch to a local tool
//! or a connected node, then emit `tool_result` hooks (the first
//! modification replaces the result). Failures emit an error-flavored
//! `tool_result` hook before propagating.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ag_domain::error::{Error, Result};
use ag_domain::trace::TraceEvent;
use ag_protocol::GatewayEvent;

use crate::runtime::approval::command_shape;
use crate::runtime::extensions::{ToolCallEvent, ToolResultEvent};
use crate::runtime::node_invoke::NodeInvokeOutcome;
use crate::runtime::tools::{ProgressFn, ToolOutput};
use crate::state::AppState;

/// Invoke one tool call through the full pipeline.
pub async fn invoke_tool(
    state: &AppState,
    session_key: Option<&str>,
    tool_name: &str,
    tool_call_id: &str,
    params: Value,
    cancel: &CancellationToken,
    on_update: Option<ProgressFn>,
) -> Result<ToolOutput> {
    // ── 1. Pre-execution hooks (may block) ────────────────────────
    if state.extensions.has_call_hooks() {
        let event = ToolCallEvent {
            tool_name: tool_name.to_owned(),
            tool_call_id: tool_call_id.to_owned(),
            input: params.clone(),
        };
        if let Some(decision) = state.extensions.emit_tool_call(&event).await {
            let reason = decision
                .reason
                .unwrap_or_else(|| "blocked by extension".into());
            return Err(Error::ToolBlocked(reason));
        }
    }

    // ── 2. Approval gate ──────────────────────────────────────────
    let shape = command_shape(tool_name, &params);
    if state.requires_approval(&shape) {
        let session = session_key.unwrap_or("anonymous");
        let connections = state.connections.clone();
        let session_owned = session.to_owned();
        state
            .approvals
            .require_approval(session, &shape, move |info| {
                connections.broadcast(
                    GatewayEvent::ApprovalRequest {
                        id: info.id.to_string(),
                        session_key: session_owned,
                        command: info.command,
                    },
                    None,
                );
            })
            .await?;
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // ── 3. Execute ────────────────────────────────────────────────
    let outcome = dispatch(state, session_key, tool_name, tool_call_id, &params, cancel, on_update).await;

    // ── 4. Post-execution hooks ───────────────────────────────────
    match outcome {
        Ok(mut output) => {
            if state.extensions.has_result_hooks() {
                let event = ToolResultEvent {
                    tool_name: tool_name.to_owned(),
                    tool_call_id: tool_call_id.to_owned(),
                    input: params,
                    content: output.content.clone(),
                    details: output.details.clone(),
                    is_error: false,
                };
                if let Some(modification) = state.extensions.emit_tool_result(&event).await {
                    if let Some(content) = modification.content {
                        output.content = content;
                    }
                    if let Some(details) = modification.details {
                        output.details = Some(details);
                    }
                }
            }
            Ok(output)
        }
        Err(e) => {
            if state.extensions.has_result_hooks() {
                let event = ToolResultEvent {
                    tool_name: tool_name.to_owned(),
                    tool_call_id: tool_call_id.to_owned(),
                    input: params,
                    content: e.to_string(),
                    details: None,
                    is_error: true,
                };
                let _ = state.extensions.emit_tool_result(&event).await;
            }
            Err(e)
        }
    }
}

/// Route the call: local registry first, then any node advertising the
/// tool, otherwise unknown.
async fn dispatch(
    state: &AppState,
    session_key: Option<&str>,
    tool_name: &str,
    tool_call_id: &str,
    params: &Value,
    cancel: &CancellationToken,
    on_update: Option<ProgressFn>,
) -> Result<ToolOutput> {
    if let Some(tool) = state.tools.get(tool_name) {
        TraceEvent::ToolDispatched {
            tool: tool_name.to_owned(),
            routed_to: "local".into(),
        }
        .emit();
        return tool
            .execute(tool_call_id, params.clone(), cancel.clone(), on_update)
            .await;
    }

    if let Some(conn) = state.connections.find_node_for_tool(tool_name) {
        let outcome = state
            .node_invoker
            .dispatch(
                &conn.conn_id,
                tool_name,
                params.clone(),
                session_key.map(String::from),
                |event| conn.send(event.into_frame(None, None)),
            )
            .await?;
        return outcome_to_output(tool_name, outcome);
    }

    Err(Error::ToolExecution(format!("unknown tool: {tool_name}")))
}

fn outcome_to_output(tool_name: &str, outcome: NodeInvokeOutcome) -> Result<ToolOutput> {
    if !outcome.success {
        return Err(Error::ToolExecution(
            outcome
                .error
                .unwrap_or_else(|| format!("{tool_name}: node reported failure")),
        ));
    }
    let content = match &outcome.result {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    Ok(ToolOutput {
        content,
        details: Some(outcome.result),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
