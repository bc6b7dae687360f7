use serde::Serialize;

/// Structured trace events emitted across all agentgate crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_key: String,
        session_id: String,
        is_new: bool,
    },
    SessionDeleted {
        session_key: String,
    },
    TranscriptAppend {
        session_key: String,
        lines: usize,
    },
    RouteResolved {
        channel: String,
        agent_id: String,
        matched_by: String,
    },
    DedupeHit {
        key: String,
    },
    LockAcquired {
        session_key: String,
        waited_ms: u64,
    },
    StaleLockRemoved {
        lock_path: String,
        age_secs: u64,
    },
    TokenIssued {
        device_id: String,
        role: String,
    },
    TokenRevoked {
        device_id: String,
    },
    PresenceChanged {
        id: String,
        state_version: u64,
    },
    HeartbeatTimeout {
        channel: String,
    },
    ToolDispatched {
        tool: String,
        routed_to: String,
    },
    ContextPruned {
        mode: String,
        before: usize,
        after: usize,
    },
    ConfigReloaded {
        restart_required: bool,
    },
    TurnCompleted {
        session_key: String,
        new_messages: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ag_event");
    }
}
