use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ag_domain::error::Result;
use ag_domain::message::{Message, ToolDefinition};
use ag_domain::stream::BoxStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events a model backend emits while streaming one completion.
/// The turn runner translates these into the richer per-turn event
/// vocabulary (message/tool execution events).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    TextStart,
    TextDelta { text: String },
    TextEnd,
    /// The model began a tool call.
    ToolCallStart { call_id: String, name: String },
    /// Incremental tool-call argument JSON.
    ToolCallDelta { call_id: String, delta: String },
    /// Tool call complete with parsed arguments.
    ToolCallEnd {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The completion finished.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    Error { message: String },
}

/// One streaming completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Model identifier; `None` = the provider's default.
    pub model: Option<String>,
    pub think_level: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A model backend. Implementations are event-bearing: one call yields
/// a stream of [`ModelEvent`]s ending with `Done` (or `Error`).
#[async_trait]
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_events_serialize_tagged() {
        let json = serde_json::to_value(ModelEvent::ToolCallEnd {
            call_id: "c1".into(),
            name: "bash".into(),
            arguments: serde_json::json!({ "command": "ls" }),
        })
        .unwrap();
        assert_eq!(json["type"], "tool_call_end");
        assert_eq!(json["call_id"], "c1");
    }
}
