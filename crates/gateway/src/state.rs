//! Shared application state.
//!
//! Every process-wide registry is an explicit dependency constructed at
//! bootstrap and passed by handle — tests instantiate fresh copies.

use std::sync::Arc;

use parking_lot::RwLock;

use ag_domain::config::Config;
use ag_providers::ProviderRegistry;
use ag_sessions::{SessionOverrides, SessionStore, TranscriptWriter};

use crate::auth::tokens::TokenManager;
use crate::presence::PresenceRegistry;
use crate::runtime::approval::ApprovalStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::dedupe::DedupeCache;
use crate::runtime::extensions::ExtensionRunner;
use crate::runtime::heartbeat::HeartbeatMonitor;
use crate::runtime::node_invoke::NodeInvoker;
use crate::runtime::tools::ToolRegistry;
use crate::skills::SkillSet;
use crate::ws::ConnectionRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Atomically swappable config snapshot. Turns read the snapshot once
/// at their start; a hot reload only affects later turns.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn get(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    pub fn swap(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heartbeats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-channel heartbeat monitors, built at bootstrap.
#[derive(Debug, Default)]
pub struct HeartbeatSet {
    monitors: Vec<Arc<HeartbeatMonitor>>,
}

impl HeartbeatSet {
    pub fn new(monitors: Vec<Arc<HeartbeatMonitor>>) -> Self {
        Self { monitors }
    }

    pub fn start_all(&self) {
        for m in &self.monitors {
            m.start();
        }
    }

    pub fn stop_all(&self) {
        for m in &self.monitors {
            m.stop();
        }
    }

    /// Reset the watchdog for a channel (inbound traffic seen).
    pub fn reset(&self, channel: &str) {
        if let Some(m) = self.monitors.iter().find(|m| m.channel_id() == channel) {
            m.reset();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AppState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
pub struct AppState {
    // ── Config ────────────────────────────────────────────────────
    pub config: ConfigHandle,

    // ── Sessions ──────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub transcripts: Arc<TranscriptWriter>,
    pub overrides: Arc<SessionOverrides>,

    // ── Model providers ───────────────────────────────────────────
    pub providers: Arc<ProviderRegistry>,

    // ── Runtime ───────────────────────────────────────────────────
    pub dedupe: Arc<DedupeCache>,
    pub extensions: Arc<ExtensionRunner>,
    pub tools: Arc<ToolRegistry>,
    pub approvals: Arc<ApprovalStore>,
    pub node_invoker: Arc<NodeInvoker>,
    pub cancel_map: Arc<CancelMap>,
    pub heartbeats: Arc<HeartbeatSet>,

    // ── Connections & presence ────────────────────────────────────
    pub connections: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceRegistry>,

    // ── Security (startup-computed) ───────────────────────────────
    pub tokens: Arc<TokenManager>,
    /// SHA-256 of the static gateway secret; `None` = dev mode.
    pub static_token_hash: Option<Vec<u8>>,
    /// Compiled approval danger set (recompiled on hot reload).
    pub approval_patterns: Arc<RwLock<Arc<regex::RegexSet>>>,

    // ── Skills ────────────────────────────────────────────────────
    pub skills: Arc<SkillSet>,
}

impl AppState {
    /// Whether a command shape must pass the approval gate.
    pub fn requires_approval(&self, shape: &str) -> bool {
        self.approval_patterns.read().is_match(shape)
    }

    /// Method names plus eligible skills, advertised in the hello.
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = crate::dispatch::METHODS.iter().map(|m| m.to_string()).collect();
        caps.extend(self.tools.names().into_iter().map(|t| format!("tool:{t}")));
        caps.extend(
            self.skills
                .eligible()
                .iter()
                .map(|s| format!("skill:{}", s.name)),
        );
        caps
    }
}
