//! The conversation message model.
//!
//! Transcripts are line-delimited JSON where each line is one [`Message`].
//! The `role` tag discriminates the variants; `toolResult` lines always
//! reference a tool call previously emitted by an assistant message in
//! the same session.

use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model, embedded in an assistant
/// message. `id` is unique within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// One transcript message, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    System { content: String },

    #[serde(rename_all = "camelCase")]
    User {
        content: String,
        /// References to attached media (URLs or file paths).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        media: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            media: Vec::new(),
            timestamp: Some(now_ms()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: Some(now_ms()),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
            timestamp: Some(now_ms()),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        success: bool,
    ) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            success,
            timestamp: Some(now_ms()),
        }
    }

    /// The wire value of the `role` tag.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolResult { .. } => "toolResult",
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    /// Plain text content of the message.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content, .. }
            | Message::Assistant { content, .. }
            | Message::ToolResult { content, .. } => content,
        }
    }

    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Message::System { .. } => None,
            Message::User { timestamp, .. }
            | Message::Assistant { timestamp, .. }
            | Message::ToolResult { timestamp, .. } => *timestamp,
        }
    }
}

/// Current time as epoch milliseconds (the transcript timestamp unit).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_serialize() {
        let json = serde_json::to_value(Message::system("hi")).unwrap();
        assert_eq!(json["role"], "system");

        let json = serde_json::to_value(Message::tool_result("c1", "bash", "out", true)).unwrap();
        assert_eq!(json["role"], "toolResult");
        assert_eq!(json["toolCallId"], "c1");
        assert_eq!(json["toolName"], "bash");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn assistant_tool_calls_round_trip() {
        let msg = Message::assistant_with_tools(
            "on it",
            vec![ToolCall {
                id: "call_1".into(),
                name: "bash".into(),
                input: serde_json::json!({ "command": "ls" }),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(json.contains("toolCalls"), true);
    }

    #[test]
    fn empty_optionals_are_omitted() {
        let json = serde_json::to_value(Message::User {
            content: "hi".into(),
            media: Vec::new(),
            timestamp: None,
        })
        .unwrap();
        assert!(json.get("media").is_none());
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn unknown_role_fails_to_parse() {
        let err = serde_json::from_str::<Message>(r#"{"role":"oracle","content":"x"}"#);
        assert!(err.is_err());
    }
}
