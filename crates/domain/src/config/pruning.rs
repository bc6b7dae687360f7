use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context pruning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pre-turn transform over the message history that keeps token usage
/// bounded. System, user, and assistant messages are never pruned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    #[serde(default)]
    pub mode: PruningMode,

    /// `cache-ttl` mode: a prunable tool result older than this is dropped.
    #[serde(default = "d_ttl_ms")]
    pub ttl_ms: u64,

    /// `soft-trim` mode: target fraction of the context window.
    #[serde(default = "d_soft_trim_ratio")]
    pub soft_trim_ratio: f64,

    /// Protect messages before the first user message.
    #[serde(default = "d_true")]
    pub keep_bootstrap_safe: bool,

    /// Tool names whose results may be dropped.
    #[serde(default = "d_prunable_tools")]
    pub prunable_tools: Vec<String>,

    /// Estimated model context window, in tokens.
    #[serde(default = "d_context_window_tokens")]
    pub context_window_tokens: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            mode: PruningMode::Disabled,
            ttl_ms: d_ttl_ms(),
            soft_trim_ratio: d_soft_trim_ratio(),
            keep_bootstrap_safe: true,
            prunable_tools: d_prunable_tools(),
            context_window_tokens: d_context_window_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PruningMode {
    #[default]
    Disabled,
    CacheTtl,
    SoftTrim,
}

impl PruningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruningMode::Disabled => "disabled",
            PruningMode::CacheTtl => "cache-ttl",
            PruningMode::SoftTrim => "soft-trim",
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ttl_ms() -> u64 {
    300_000
}
fn d_soft_trim_ratio() -> f64 {
    0.75
}
fn d_true() -> bool {
    true
}
fn d_prunable_tools() -> Vec<String> {
    ["bash", "shell", "read", "write", "edit", "glob", "grep"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn d_context_window_tokens() -> usize {
    200_000
}
