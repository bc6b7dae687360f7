use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Regexes matched against the command shape (`"{tool} {first arg
    /// token}"`). A match routes the call through the approval gate.
    #[serde(default = "d_approval_patterns")]
    pub approval_patterns: Vec<String>,

    /// How long a pending approval waits for a human decision.
    #[serde(default = "d_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// Timeout for tool invocations dispatched to connected nodes.
    #[serde(default = "d_node_invoke_timeout_secs")]
    pub node_invoke_timeout_secs: u64,

    /// Pending node requests allowed per node (0 = unlimited).
    #[serde(default = "d_max_pending_per_node")]
    pub max_pending_per_node: usize,

    /// Pending node requests allowed globally (0 = unlimited).
    #[serde(default = "d_max_pending_global")]
    pub max_pending_global: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            approval_patterns: d_approval_patterns(),
            approval_timeout_secs: d_approval_timeout_secs(),
            node_invoke_timeout_secs: d_node_invoke_timeout_secs(),
            max_pending_per_node: d_max_pending_per_node(),
            max_pending_global: d_max_pending_global(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skills
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Directories scanned for `<skill>/skill.json` manifests.
    #[serde(default)]
    pub dirs: Vec<std::path::PathBuf>,

    /// Skill names disabled regardless of eligibility.
    #[serde(default)]
    pub disabled: Vec<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_approval_patterns() -> Vec<String> {
    vec![
        r"^(shell|exec|bash)\b".into(),
        r"\brm\s".into(),
        r"\bsudo\b".into(),
        r"^write\b".into(),
    ]
}
fn d_approval_timeout_secs() -> u64 {
    300
}
fn d_node_invoke_timeout_secs() -> u64 {
    30
}
fn d_max_pending_per_node() -> usize {
    50
}
fn d_max_pending_global() -> usize {
    200
}
