use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heartbeat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-channel watchdog configuration. A channel with no inbound
/// traffic for `timeout_seconds` triggers a health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "d_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Channels to watch (e.g. `["telegram", "discord"]`).
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: d_timeout_seconds(),
            channels: Vec::new(),
        }
    }
}

fn d_timeout_seconds() -> u64 {
    1800
}
