//! The turn runner.
//!
//! Drives the model/tool loop for one turn: stream a completion,
//! execute any requested tools through the pipeline, feed results back,
//! repeat until the model answers without tools (or the loop bound
//! trips). Every step is pushed into the per-turn [`EventStream`] as an
//! [`AgentEvent`]; `agent_end` completes the stream with the turn's new
//! messages.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ag_domain::error::Error;
use ag_domain::event::{agent_event_stream, AgentEvent};
use ag_domain::message::{now_ms, Message, ToolCall};
use ag_domain::stream::EventStream;
use ag_providers::{ChatRequest, ModelEvent, ModelProvider};

use crate::runtime::executor;
use crate::runtime::tools::ProgressFn;
use crate::state::AppState;

/// Upper bound on model/tool round trips per turn.
const MAX_TOOL_LOOPS: usize = 25;

pub struct TurnInput {
    pub session_key: String,
    /// Full prompt: system + pruned history + the new user message.
    pub messages: Vec<Message>,
    pub provider: Arc<dyn ModelProvider>,
    pub model: Option<String>,
    pub think_level: Option<String>,
    pub cancel: CancellationToken,
}

/// Start a turn. The returned stream yields the turn's events; its
/// result resolves to the new messages once the turn completes.
pub fn run_turn(state: AppState, input: TurnInput) -> EventStream<AgentEvent, Vec<Message>> {
    let stream = agent_event_stream();
    let out = stream.clone();

    tokio::spawn(async move {
        if let Err(e) = run_turn_inner(&state, input, &stream).await {
            stream.push(AgentEvent::TurnError {
                message: e.to_string(),
            });
            stream.end(None);
        }
    });

    out
}

async fn run_turn_inner(
    state: &AppState,
    input: TurnInput,
    stream: &EventStream<AgentEvent, Vec<Message>>,
) -> ag_domain::Result<()> {
    let mut convo = input.messages.clone();
    let mut new_messages: Vec<Message> = Vec::new();
    let tool_defs = state.tools.definitions();

    for _loop_idx in 0..MAX_TOOL_LOOPS {
        if input.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        stream.push(AgentEvent::MessageStart {
            id: message_id.clone(),
        });

        let req = ChatRequest {
            messages: convo.clone(),
            tools: tool_defs.clone(),
            model: input.model.clone(),
            think_level: input.think_level.clone(),
        };
        let mut model_stream = input
            .provider
            .chat_stream(&req, &input.cancel)
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        let mut text_buf = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        // call_id → (name, argument JSON buffer)
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();

        while let Some(event) = model_stream.next().await {
            if input.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match event.map_err(|e| Error::Provider(e.to_string()))? {
                ModelEvent::TextStart => stream.push(AgentEvent::TextStart),
                ModelEvent::TextDelta { text } => {
                    text_buf.push_str(&text);
                    stream.push(AgentEvent::TextDelta { text });
                }
                ModelEvent::TextEnd => stream.push(AgentEvent::TextEnd),
                ModelEvent::ToolCallStart { call_id, name } => {
                    tc_bufs.insert(call_id, (name, String::new()));
                }
                ModelEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                }
                ModelEvent::ToolCallEnd {
                    call_id,
                    name,
                    arguments,
                } => {
                    tc_bufs.remove(&call_id);
                    pending.push(ToolCall {
                        id: call_id,
                        name,
                        input: arguments,
                    });
                }
                ModelEvent::Done { .. } => break,
                ModelEvent::Error { message } => return Err(Error::Provider(message)),
            }
        }

        // Providers that only stream start+delta: assemble from buffers.
        for (call_id, (name, args)) in tc_bufs.drain() {
            let arguments = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            pending.push(ToolCall {
                id: call_id,
                name,
                input: arguments,
            });
        }

        // ── Final answer: no tool calls ───────────────────────────
        if pending.is_empty() {
            let assistant = Message::assistant(&text_buf);
            new_messages.push(assistant);
            stream.push(AgentEvent::MessageEnd);
            stream.push(AgentEvent::AgentEnd {
                messages: new_messages,
            });
            return Ok(());
        }

        // ── Tool phase ────────────────────────────────────────────
        let assistant = Message::assistant_with_tools(&text_buf, pending.clone());
        convo.push(assistant.clone());
        new_messages.push(assistant);

        for tc in &pending {
            if input.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            stream.push(AgentEvent::ToolExecutionStart {
                id: tc.id.clone(),
                name: tc.name.clone(),
                args: tc.input.clone(),
                timestamp: now_ms(),
            });

            let update_stream = stream.clone();
            let update_id = tc.id.clone();
            let on_update: ProgressFn = Arc::new(move |update| {
                update_stream.push(AgentEvent::ToolExecutionUpdate {
                    id: update_id.clone(),
                    update,
                });
            });

            let result = executor::invoke_tool(
                state,
                Some(&input.session_key),
                &tc.name,
                &tc.id,
                tc.input.clone(),
                &input.cancel,
                Some(on_update),
            )
            .await;

            let tool_msg = match result {
                Ok(output) => {
                    stream.push(AgentEvent::ToolExecutionEnd {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        success: true,
                        result: Some(serde_json::json!({ "text": output.content })),
                        error: None,
                    });
                    Message::tool_result(&tc.id, &tc.name, &output.content, true)
                }
                Err(e) => {
                    // Blocks and denials surface their bare reason; the
                    // model sees it as the tool's (failed) result.
                    let text = match &e {
                        Error::ToolBlocked(reason) | Error::ApprovalRequired(reason) => {
                            reason.clone()
                        }
                        other => other.to_string(),
                    };
                    stream.push(AgentEvent::ToolExecutionEnd {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        success: false,
                        result: None,
                        error: Some(text.clone()),
                    });
                    Message::tool_result(&tc.id, &tc.name, &text, false)
                }
            };
            convo.push(tool_msg.clone());
            new_messages.push(tool_msg);
        }

        stream.push(AgentEvent::MessageEnd);
    }

    Err(Error::Provider(format!(
        "tool loop limit reached ({MAX_TOOL_LOOPS} iterations)"
    )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::test_state;
    use ag_providers::ScriptedProvider;

    fn tool_call_script(name: &str, args: Value) -> Vec<ModelEvent> {
        vec![
            ModelEvent::ToolCallStart {
                call_id: "call_1".into(),
                name: name.into(),
            },
            ModelEvent::ToolCallEnd {
                call_id: "call_1".into(),
                name: name.into(),
                arguments: args,
            },
            ModelEvent::Done { stop_reason: None },
        ]
    }

    async fn collect(stream: &EventStream<AgentEvent, Vec<Message>>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev);
        }
        events
    }

    fn input(provider: Arc<ScriptedProvider>, message: &str) -> TurnInput {
        TurnInput {
            session_key: "k1".into(),
            messages: vec![Message::user(message)],
            provider,
            model: None,
            think_level: None,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn text_only_turn_completes() {
        let (_dir, state) = test_state();
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        provider.push_text_reply("hello there");

        let stream = run_turn(state, input(provider, "hi"));
        let result = stream.result().await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content(), "hello there");
        assert_eq!(result[0].role(), "assistant");
    }

    #[tokio::test]
    async fn tool_turn_runs_tool_and_loops() {
        let (_dir, state) = test_state();
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        provider.push_script(tool_call_script(
            "echo",
            serde_json::json!({ "text": "tool says hi" }),
        ));
        provider.push_text_reply("done");

        let stream = run_turn(state, input(provider.clone(), "run the tool"));
        let events = collect(&stream).await;
        let result = stream.result().await.unwrap();

        // assistant(tool_calls) + toolResult + final assistant.
        assert_eq!(result.len(), 3);
        assert!(matches!(&result[1], Message::ToolResult { content, success, .. }
            if content == "tool says hi" && *success));
        assert_eq!(result[2].content(), "done");
        assert_eq!(provider.call_count(), 2);

        // Tool events pair up before message_end.
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                AgentEvent::MessageStart { .. } => "start",
                AgentEvent::ToolExecutionStart { .. } => "tool_start",
                AgentEvent::ToolExecutionEnd { .. } => "tool_end",
                AgentEvent::MessageEnd => "end",
                AgentEvent::AgentEnd { .. } => "agent_end",
                _ => "other",
            })
            .collect();
        let ts = kinds.iter().position(|k| *k == "tool_start").unwrap();
        let te = kinds.iter().position(|k| *k == "tool_end").unwrap();
        let first_end = kinds.iter().position(|k| *k == "end").unwrap();
        assert!(ts < te && te < first_end);
        assert_eq!(*kinds.last().unwrap(), "agent_end");
    }

    #[tokio::test]
    async fn failed_tool_becomes_error_result_and_turn_continues() {
        let (_dir, state) = test_state();
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        // Echo without its required argument fails.
        provider.push_script(tool_call_script("echo", serde_json::json!({})));
        provider.push_text_reply("recovered");

        let stream = run_turn(state, input(provider, "go"));
        let result = stream.result().await.unwrap();

        assert!(matches!(&result[1], Message::ToolResult { success, .. } if !success));
        assert_eq!(result[2].content(), "recovered");
    }

    #[tokio::test]
    async fn provider_error_ends_stream_without_result() {
        let (_dir, state) = test_state();
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        provider.push_script(vec![ModelEvent::Error {
            message: "upstream 500".into(),
        }]);

        let stream = run_turn(state, input(provider, "hi"));
        let events = collect(&stream).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::TurnError { message } if message.contains("upstream 500"))));
        assert!(stream.result().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_turn_emits_terminal_error() {
        let (_dir, state) = test_state();
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        let mut turn_input = input(provider, "hi");
        turn_input.cancel.cancel();

        let stream = run_turn(state, turn_input);
        let events = collect(&stream).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::TurnError { .. })));
        assert!(stream.result().await.is_none());
    }
}
