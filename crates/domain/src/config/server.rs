use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Broadcast replay ring depth (reconnect catch-up, best-effort).
    #[serde(default = "d_replay_depth")]
    pub replay_depth: usize,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            replay_depth: d_replay_depth(),
            http: HttpConfig::default(),
        }
    }
}

/// The optional HTTP façade (chat completions, tools/invoke).
/// `/health/live` and the `/gateway` WebSocket are always served.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dedupe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeConfig {
    /// TTL for idempotency entries, in minutes.
    #[serde(default = "d_ttl_minutes")]
    pub ttl_minutes: u64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: d_ttl_minutes(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    7431
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_replay_depth() -> usize {
    256
}
fn d_ttl_minutes() -> u64 {
    60
}
