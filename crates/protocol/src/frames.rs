use serde::{Deserialize, Serialize};
use serde_json::Value;

use ag_domain::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One wire frame. A malformed frame terminates the connection with a
/// `protocol.error` event before close; frames are never half-processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },
    Event {
        event: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(
            rename = "stateVersion",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        state_version: Option<u64>,
    },
}

/// User-visible failure carried in a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorShape {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().into(),
            message: e.to_string(),
        }
    }
}

impl Frame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Res {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: &Error) -> Self {
        Frame::Res {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ErrorShape::from(error)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed vocabulary behind event frames. Serialized as
/// `{ "event": <name>, "payload": { … } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum GatewayEvent {
    #[serde(rename = "hello")]
    Hello(crate::HelloPayload),

    #[serde(rename = "presence.update")]
    PresenceUpdate(crate::PresenceSnapshot),

    #[serde(rename = "agent.message.start", rename_all = "camelCase")]
    AgentMessageStart {
        session_key: String,
        message_id: String,
    },

    #[serde(rename = "agent.block_reply", rename_all = "camelCase")]
    BlockReply { session_key: String, text: String },

    #[serde(rename = "agent.message.end", rename_all = "camelCase")]
    AgentMessageEnd {
        session_key: String,
        texts: Vec<String>,
    },

    #[serde(rename = "agent.tool.start", rename_all = "camelCase")]
    ToolStart {
        session_key: String,
        tool_call_id: String,
        name: String,
        args: Value,
    },

    #[serde(rename = "agent.tool.update", rename_all = "camelCase")]
    ToolUpdate {
        session_key: String,
        tool_call_id: String,
        update: Value,
    },

    #[serde(rename = "agent.tool.end", rename_all = "camelCase")]
    ToolEnd {
        session_key: String,
        tool_call_id: String,
        name: String,
        success: bool,
    },

    #[serde(rename = "agent.turn.end", rename_all = "camelCase")]
    TurnEnd {
        session_key: String,
        new_messages: usize,
    },

    #[serde(rename = "agent.turn.error", rename_all = "camelCase")]
    TurnError { session_key: String, message: String },

    #[serde(rename = "tools.approval.request", rename_all = "camelCase")]
    ApprovalRequest {
        id: String,
        session_key: String,
        command: String,
    },

    #[serde(rename = "node.invoke.request", rename_all = "camelCase")]
    NodeInvokeRequest {
        request_id: String,
        tool: String,
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
    },

    #[serde(rename = "health.probe")]
    HealthProbe { channel: String },

    #[serde(rename = "config.restart_required")]
    ConfigRestartRequired { reason: String },

    #[serde(rename = "protocol.error")]
    ProtocolError { message: String },
}

impl GatewayEvent {
    /// Build an event frame. `seq` is stamped by the connection layer on
    /// broadcast events; `state_version` rides on presence updates.
    pub fn into_frame(self, seq: Option<u64>, state_version: Option<u64>) -> Frame {
        let value = serde_json::to_value(&self).unwrap_or(Value::Null);
        let (event, payload) = match value {
            Value::Object(mut map) => {
                let event = map
                    .remove("event")
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_else(|| "unknown".into());
                let payload = map.remove("payload").unwrap_or(Value::Null);
                (event, payload)
            }
            _ => ("unknown".into(), Value::Null),
        };
        Frame::Event {
            event,
            payload,
            seq,
            state_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::Req {
            id: "1".into(),
            method: "chat.send".into(),
            params: serde_json::json!({ "message": "hi" }),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"req""#));
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Frame::Req { method, .. } if method == "chat.send"));
    }

    #[test]
    fn error_response_carries_code() {
        let frame = Frame::err("9", &Error::LockTimeout("busy".into()));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "lock_timeout");
    }

    #[test]
    fn event_frame_has_name_and_payload() {
        let frame = GatewayEvent::BlockReply {
            session_key: "k".into(),
            text: "partial".into(),
        }
        .into_frame(Some(4), None);

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "agent.block_reply");
        assert_eq!(json["payload"]["text"], "partial");
        assert_eq!(json["seq"], 4);
        assert!(json.get("stateVersion").is_none());
    }

    #[test]
    fn malformed_frame_fails_to_parse() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"bogus"}"#).is_err());
        assert!(serde_json::from_str::<Frame>("not json").is_err());
    }

    #[test]
    fn missing_params_defaults_to_null() {
        let frame: Frame = serde_json::from_str(r#"{"type":"req","id":"1","method":"health"}"#)
            .unwrap();
        assert!(matches!(frame, Frame::Req { params, .. } if params.is_null()));
    }
}
