use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session routing configuration — controls how inbound turns map to
/// agents and session keys via the binding hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// State root. Transcripts live under `{root}/sessions/`, the token
    /// database at `{root}/tokens.json`, overrides at
    /// `{root}/session_overrides.json`.
    #[serde(default = "d_root")]
    pub root: PathBuf,

    /// Agent used when no binding matches.
    #[serde(default = "d_default_agent")]
    pub default_agent: String,

    /// Known agent IDs. Empty = accept any agent ID as-is.
    #[serde(default)]
    pub agents: Vec<String>,

    /// DM scoping strategy (the trailing session-key component).
    #[serde(default)]
    pub dm_scope: DmScope,

    /// Ordered binding rules. Declaration order breaks ties within a
    /// match class; the class hierarchy decides across classes.
    #[serde(default)]
    pub bindings: Vec<BindingRule>,

    /// Collapse the same human across channels into one canonical
    /// identity. Order matters: cycles are broken by first-seen.
    #[serde(default)]
    pub identity_links: Vec<IdentityLink>,

    /// Tools whose successful text results count as sent assistant
    /// output (subscriber commits them to the turn's text).
    #[serde(default = "d_messaging_tools")]
    pub messaging_tools: Vec<String>,

    /// When intermediate assistant text is flushed to clients.
    #[serde(default)]
    pub block_reply_mode: BlockReplyMode,

    /// Upper bound on waiting for the per-session write lock.
    #[serde(default = "d_max_lock_hold_ms")]
    pub max_lock_hold_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            root: d_root(),
            default_agent: d_default_agent(),
            agents: Vec::new(),
            dm_scope: DmScope::Main,
            bindings: Vec::new(),
            identity_links: Vec::new(),
            messaging_tools: d_messaging_tools(),
            block_reply_mode: BlockReplyMode::default(),
            max_lock_hold_ms: d_max_lock_hold_ms(),
        }
    }
}

/// How DM sessions are scoped. The token is the final component of the
/// derived session key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DmScope {
    /// One shared DM session per agent.
    #[default]
    Main,
    PerPeer,
    PerChannelPeer,
    PerAccountChannelPeer,
}

impl DmScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmScope::Main => "main",
            DmScope::PerPeer => "per-peer",
            DmScope::PerChannelPeer => "per-channel-peer",
            DmScope::PerAccountChannelPeer => "per-account-channel-peer",
        }
    }
}

/// When block replies are flushed to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReplyMode {
    /// Flush on every `text_end` model event.
    #[default]
    TextEnd,
    /// Single flush at `message_end`.
    MessageEnd,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bindings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps a route shape to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingRule {
    pub agent_id: String,
    #[serde(rename = "match")]
    pub match_: BindingMatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingMatch {
    /// Channel this rule applies to (lowercased on match).
    pub channel: String,
    /// Explicit account ID, `"*"` wildcard, or absent (= default account).
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub peer: Option<RoutePeer>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

/// Peer identity used for routing and key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePeer {
    pub kind: PeerKind,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Dm,
    Group,
    Channel,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::Dm => "dm",
            PeerKind::Group => "group",
            PeerKind::Channel => "channel",
        }
    }
}

/// Aliases that all resolve to one canonical peer identity.
/// Alias form: `"{channel}:{peerId}"` (e.g. `"telegram:123"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
    pub canonical: String,
    pub aliases: Vec<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".agentgate"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}
fn d_default_agent() -> String {
    "main".into()
}
fn d_messaging_tools() -> Vec<String> {
    ["telegram", "discord", "slack", "signal"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn d_max_lock_hold_ms() -> u64 {
    60_000
}
