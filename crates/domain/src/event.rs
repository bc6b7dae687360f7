//! Model-driven events consumed by the per-turn subscriber.
//!
//! The turn runner pushes these into an [`EventStream`]; the subscriber
//! folds them into accumulated assistant text, tool metadata, and typed
//! gateway events. `agent_end` completes the stream and carries the
//! messages produced by the turn.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::stream::EventStream;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    MessageStart {
        id: String,
    },
    TextStart,
    TextDelta {
        text: String,
    },
    TextEnd,
    MessageEnd,
    ToolExecutionStart {
        id: String,
        name: String,
        args: serde_json::Value,
        timestamp: i64,
    },
    ToolExecutionUpdate {
        id: String,
        update: serde_json::Value,
    },
    ToolExecutionEnd {
        id: String,
        name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgentEnd {
        messages: Vec<Message>,
    },
    TurnError {
        message: String,
    },
}

/// Build the per-turn event stream: completes on `agent_end`, yielding
/// the turn's new messages as the result.
pub fn agent_event_stream() -> EventStream<AgentEvent, Vec<Message>> {
    EventStream::new(
        |ev| matches!(ev, AgentEvent::AgentEnd { .. }),
        |ev| match ev {
            AgentEvent::AgentEnd { messages } => messages.clone(),
            _ => Vec::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let json = serde_json::to_value(AgentEvent::MessageStart { id: "m1".into() }).unwrap();
        assert_eq!(json["type"], "message_start");

        let json = serde_json::to_value(AgentEvent::ToolExecutionEnd {
            id: "t1".into(),
            name: "bash".into(),
            success: true,
            result: Some(serde_json::json!({ "text": "ok" })),
            error: None,
        })
        .unwrap();
        assert_eq!(json["type"], "tool_execution_end");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn stream_completes_on_agent_end() {
        let stream = agent_event_stream();
        stream.push(AgentEvent::TextDelta { text: "hi".into() });
        stream.push(AgentEvent::AgentEnd {
            messages: vec![Message::assistant("hi")],
        });

        let result = stream.result().await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
