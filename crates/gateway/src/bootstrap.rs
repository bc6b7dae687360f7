//! Startup wiring: build the shared state from a config, then serve.

use std::sync::Arc;
use std::time::Duration;

use ag_domain::config::Config;
use ag_domain::error::{Error, Result};
use ag_protocol::{GatewayEvent, PresenceKind};
use ag_providers::{ProviderRegistry, ScriptedProvider};
use ag_sessions::{SessionOverrides, SessionStore, TranscriptWriter};

use crate::auth;
use crate::auth::tokens::TokenManager;
use crate::presence::PresenceRegistry;
use crate::runtime::approval::ApprovalStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::dedupe::DedupeCache;
use crate::runtime::extensions::ExtensionRunner;
use crate::runtime::heartbeat::{HealthCallback, HeartbeatMonitor};
use crate::runtime::node_invoke::NodeInvoker;
use crate::runtime::tools::{ClockTool, EchoTool, ToolRegistry};
use crate::skills;
use crate::state::{AppState, ConfigHandle, HeartbeatSet};
use crate::ws::ConnectionRegistry;

/// Build the application state. Providers are registered by the caller
/// (the binary registers the built-in scripted provider when nothing
/// external is wired in).
pub fn build_state(config: Config) -> Result<AppState> {
    let root = config.sessions.root.clone();

    let sessions = Arc::new(SessionStore::new(&root)?);
    let transcripts = Arc::new(TranscriptWriter::new(sessions.sessions_dir()));
    let overrides = Arc::new(SessionOverrides::load(&root));

    let providers = Arc::new(ProviderRegistry::new(config.providers.default.clone()));

    let dedupe = Arc::new(DedupeCache::new(Duration::from_secs(
        config.dedupe.ttl_minutes * 60,
    )));

    let tokens = Arc::new(TokenManager::load(&root));
    let static_token_hash = auth::static_token_hash(&config.auth);

    let approval_patterns = regex::RegexSet::new(&config.tools.approval_patterns)
        .map_err(|e| Error::Config(format!("tools.approval_patterns: {e}")))?;

    let approvals = Arc::new(ApprovalStore::new(Duration::from_secs(
        config.tools.approval_timeout_secs,
    )));
    let node_invoker = Arc::new(NodeInvoker::new(
        Duration::from_secs(config.tools.node_invoke_timeout_secs),
        config.tools.max_pending_per_node,
        config.tools.max_pending_global,
    ));

    let connections = Arc::new(ConnectionRegistry::new(config.server.replay_depth));
    let presence = Arc::new(PresenceRegistry::new());
    presence.register(
        "gateway",
        PresenceKind::Gateway,
        env!("CARGO_PKG_VERSION"),
        serde_json::Value::Null,
    );

    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(EchoTool));
    tools.register(Arc::new(ClockTool));

    // A heartbeat timeout broadcasts a probe request; the channel
    // adapter watching the event decides whether it is still healthy.
    let probe_connections = connections.clone();
    let health_callback: HealthCallback = Arc::new(move |channel: String| {
        let connections = probe_connections.clone();
        Box::pin(async move {
            connections.broadcast(GatewayEvent::HealthProbe { channel }, None);
        })
    });
    let monitors = config
        .heartbeat
        .channels
        .iter()
        .map(|channel| {
            Arc::new(HeartbeatMonitor::new(
                channel.clone(),
                Duration::from_secs(config.heartbeat.timeout_seconds),
                health_callback.clone(),
            ))
        })
        .collect();
    let heartbeats = Arc::new(HeartbeatSet::new(monitors));

    let skill_set = Arc::new(skills::load_skills(&config));

    Ok(AppState {
        config: ConfigHandle::new(config),
        sessions,
        transcripts,
        overrides,
        providers,
        dedupe,
        extensions: Arc::new(ExtensionRunner::new()),
        tools,
        approvals,
        node_invoker,
        cancel_map: Arc::new(CancelMap::new()),
        heartbeats,
        connections,
        presence,
        tokens,
        static_token_hash,
        approval_patterns: Arc::new(parking_lot::RwLock::new(Arc::new(approval_patterns))),
        skills: skill_set,
    })
}

/// Serve the gateway until the process is stopped.
pub async fn serve(state: AppState, config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = state.config.get();

    // The built-in scripted provider keeps a bare gateway answerable.
    if state.providers.ids().is_empty() {
        tracing::warn!(
            provider = %config.providers.default,
            "no external model providers registered — using the built-in scripted echo provider"
        );
        state
            .providers
            .register(Arc::new(ScriptedProvider::new(&config.providers.default)));
    }

    state.heartbeats.start_all();
    if let Some(path) = config_path {
        crate::config_watch::spawn_config_watcher(state.clone(), path);
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = crate::api::router(state.clone()).with_state(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(Error::Io)?;

    tracing::info!(%addr, http_facade = config.server.http.enabled, "agentgate listening");
    axum::serve(listener, router).await.map_err(Error::Io)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fresh state over a temp directory, with short timeouts and the
/// scripted provider registered as the default.
#[cfg(test)]
pub fn test_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.sessions.root = dir.path().to_path_buf();
    config.tools.approval_timeout_secs = 1;
    config.sessions.max_lock_hold_ms = 2_000;

    let state = build_state(config).expect("test state");
    state
        .providers
        .register(Arc::new(ScriptedProvider::new("default")));
    (dir, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_state_wires_defaults() {
        let (_dir, state) = test_state();
        assert!(state.tools.get("echo").is_some());
        assert!(state.tools.get("clock").is_some());
        assert_eq!(state.presence.snapshot().entries.len(), 1);
        assert!(state.capabilities().iter().any(|c| c == "chat.send"));
        assert!(state.requires_approval("exec rm"));
        assert!(!state.requires_approval("echo hello"));
    }

    #[test]
    fn invalid_approval_pattern_fails_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sessions.root = dir.path().to_path_buf();
        config.tools.approval_patterns = vec!["[unclosed".into()];
        let err = build_state(config).unwrap_err();
        assert_eq!(err.code(), "config_error");
    }
}
