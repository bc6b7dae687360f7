//! Per-turn event subscriber.
//!
//! A small state machine that consumes model-driven [`AgentEvent`]s and
//! fans them out as typed [`GatewayEvent`]s into a channel owned by the
//! server. All mutable turn state (delta buffer, tool metadata,
//! messaging-tool tracking) lives here, local to the turn.
//!
//! States: idle → message active → (text accumulating | tool active)* →
//! idle. The delta buffer is empty in idle and between `message_end`
//! and the next `message_start`; every `tool_execution_start` is paired
//! with exactly one `tool_execution_end` before `message_end`.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use ag_domain::config::BlockReplyMode;
use ag_domain::event::AgentEvent;
use ag_protocol::GatewayEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub name: String,
    pub started_at: i64,
    pub args: Value,
}

/// Strip explicit block-reply markers before external emission.
pub fn strip_block_tags(text: &str) -> String {
    text.replace("<block_reply>", "").replace("</block_reply>", "")
}

pub struct TurnSubscriber {
    session_key: String,
    mode: BlockReplyMode,
    messaging_tools: Vec<String>,
    events: mpsc::UnboundedSender<GatewayEvent>,

    // Turn-local state.
    assistant_texts: Vec<String>,
    tool_metas: HashMap<String, ToolMeta>,
    messaging_tool_sent: HashMap<String, bool>,
    last_tool_error: Option<String>,
    delta_buffer: String,
    current_message_id: Option<String>,
    open_tools: Vec<String>,
}

impl TurnSubscriber {
    pub fn new(
        session_key: impl Into<String>,
        mode: BlockReplyMode,
        messaging_tools: Vec<String>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            mode,
            messaging_tools,
            events,
            assistant_texts: Vec::new(),
            tool_metas: HashMap::new(),
            messaging_tool_sent: HashMap::new(),
            last_tool_error: None,
            delta_buffer: String::new(),
            current_message_id: None,
            open_tools: Vec::new(),
        }
    }

    /// Accumulated assistant text for the turn.
    pub fn assistant_text(&self) -> String {
        self.assistant_texts.concat()
    }

    pub fn assistant_texts(&self) -> &[String] {
        &self.assistant_texts
    }

    pub fn last_tool_error(&self) -> Option<&str> {
        self.last_tool_error.as_deref()
    }

    pub fn has_messaging_tool_sent(&self) -> bool {
        self.messaging_tool_sent.values().any(|v| *v)
    }

    pub fn tool_meta(&self, tool_call_id: &str) -> Option<&ToolMeta> {
        self.tool_metas.get(tool_call_id)
    }

    /// All started tools have ended (checked before `message_end`).
    pub fn tools_balanced(&self) -> bool {
        self.open_tools.is_empty()
    }

    fn emit(&self, event: GatewayEvent) {
        // Receiver gone = turn aborted; nothing left to notify.
        let _ = self.events.send(event);
    }

    /// Deliver text that clients have not seen yet. In `text_end` mode
    /// every delta streams as it arrives, so nothing is ever pending;
    /// in `message_end` mode the buffer goes out here (before a tool
    /// runs) and is consumed.
    fn flush_block_replies(&mut self) {
        if self.mode == BlockReplyMode::TextEnd || self.delta_buffer.is_empty() {
            return;
        }
        let text = strip_block_tags(&self.delta_buffer);
        self.delta_buffer.clear();
        if !text.is_empty() {
            self.emit(GatewayEvent::BlockReply {
                session_key: self.session_key.clone(),
                text,
            });
        }
    }

    // ── Event handling ────────────────────────────────────────────

    pub fn handle_event(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::MessageStart { id } => self.handle_message_start(id),
            AgentEvent::TextStart => self.delta_buffer.clear(),
            AgentEvent::TextDelta { text } => self.handle_text_delta(text),
            AgentEvent::TextEnd => self.handle_text_end(),
            AgentEvent::MessageEnd => self.handle_message_end(),
            AgentEvent::ToolExecutionStart {
                id,
                name,
                args,
                timestamp,
            } => self.handle_tool_start(id, name, args, *timestamp),
            AgentEvent::ToolExecutionUpdate { id, update } => self.handle_tool_update(id, update),
            AgentEvent::ToolExecutionEnd {
                id,
                name,
                success,
                result,
                error,
            } => self.handle_tool_end(id, name, *success, result.as_ref(), error.as_deref()),
            AgentEvent::AgentEnd { .. } => {}
            AgentEvent::TurnError { message } => {
                self.emit(GatewayEvent::TurnError {
                    session_key: self.session_key.clone(),
                    message: message.clone(),
                });
            }
        }
    }

    fn handle_message_start(&mut self, id: &str) {
        self.current_message_id = Some(id.to_owned());
        self.delta_buffer.clear();
        self.emit(GatewayEvent::AgentMessageStart {
            session_key: self.session_key.clone(),
            message_id: id.to_owned(),
        });
    }

    fn handle_text_delta(&mut self, text: &str) {
        self.delta_buffer.push_str(text);
        // text_end mode streams each delta as it arrives.
        if self.mode == BlockReplyMode::TextEnd {
            let sanitized = strip_block_tags(text);
            if !sanitized.is_empty() {
                self.emit(GatewayEvent::BlockReply {
                    session_key: self.session_key.clone(),
                    text: sanitized,
                });
            }
        }
    }

    fn handle_text_end(&mut self) {
        if !self.delta_buffer.is_empty() {
            self.assistant_texts.push(self.delta_buffer.clone());
        }
        self.delta_buffer.clear();
    }

    fn handle_message_end(&mut self) {
        if !self.delta_buffer.is_empty() {
            self.assistant_texts.push(self.delta_buffer.clone());
            self.delta_buffer.clear();
        }
        debug_assert!(
            self.tools_balanced(),
            "tool_execution_start without end before message_end"
        );
        self.emit(GatewayEvent::AgentMessageEnd {
            session_key: self.session_key.clone(),
            texts: self.assistant_texts.clone(),
        });
    }

    fn handle_tool_start(&mut self, id: &str, name: &str, args: &Value, timestamp: i64) {
        // Pending intermediate text goes out before the tool runs.
        self.flush_block_replies();

        self.tool_metas.insert(
            id.to_owned(),
            ToolMeta {
                name: name.to_owned(),
                started_at: timestamp,
                args: args.clone(),
            },
        );
        self.open_tools.push(id.to_owned());

        self.emit(GatewayEvent::ToolStart {
            session_key: self.session_key.clone(),
            tool_call_id: id.to_owned(),
            name: name.to_owned(),
            args: args.clone(),
        });
    }

    fn handle_tool_update(&mut self, id: &str, update: &Value) {
        self.emit(GatewayEvent::ToolUpdate {
            session_key: self.session_key.clone(),
            tool_call_id: id.to_owned(),
            update: update.clone(),
        });
    }

    fn handle_tool_end(
        &mut self,
        id: &str,
        name: &str,
        success: bool,
        result: Option<&Value>,
        error: Option<&str>,
    ) {
        if !self.tool_metas.contains_key(id) {
            // An end without a start is a logged anomaly, nothing more.
            tracing::warn!(
                tool_call_id = %id,
                tool = %name,
                "tool_execution_end without matching start — ignoring"
            );
            return;
        }

        if success {
            self.last_tool_error = None;
        } else {
            self.last_tool_error = Some(error.unwrap_or("unknown error").to_owned());
        }

        // Messaging tools deliver text themselves; commit it so the turn
        // output reflects what the user already saw.
        if success && self.messaging_tools.iter().any(|t| t == name) {
            let sent_text = result.and_then(|r| match r {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map
                    .get("text")
                    .or_else(|| map.get("content"))
                    .and_then(|v| v.as_str())
                    .map(String::from),
                _ => None,
            });
            if let Some(text) = sent_text {
                self.messaging_tool_sent.insert(id.to_owned(), true);
                self.assistant_texts.push(text);
                tracing::info!(tool = %name, "messaging tool sent text, committing to turn output");
            }
        }

        self.open_tools.retain(|t| t != id);
        self.emit(GatewayEvent::ToolEnd {
            session_key: self.session_key.clone(),
            tool_call_id: id.to_owned(),
            name: name.to_owned(),
            success,
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
