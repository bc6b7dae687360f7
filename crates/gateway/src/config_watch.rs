//! Config hot reload.
//!
//! Polls the config file's mtime; on change the file is reparsed and
//! validated. Safe changes swap the in-memory snapshot atomically —
//! turns in flight keep their original config. Critical changes (bind
//! address, auth mode, provider set) cannot be hot-applied: the change
//! is announced and a restart is required.

use std::path::PathBuf;
use std::time::Duration;

use ag_domain::config::{Config, ConfigSeverity};
use ag_domain::trace::TraceEvent;
use ag_protocol::GatewayEvent;

use crate::state::AppState;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Whether moving from `old` to `new` requires a process restart.
pub fn restart_required(old: &Config, new: &Config) -> bool {
    if old.server.host != new.server.host || old.server.port != new.server.port {
        return true;
    }
    if old.server.http.enabled != new.server.http.enabled {
        return true;
    }
    if old.auth.token_env != new.auth.token_env {
        return true;
    }
    // Provider wiring happens at startup; a different default cannot be
    // re-registered live.
    if old.providers.default != new.providers.default {
        return true;
    }
    false
}

/// Recompile state derived from the config snapshot.
fn apply_derived(state: &AppState, config: &Config) {
    match regex::RegexSet::new(&config.tools.approval_patterns) {
        Ok(set) => *state.approval_patterns.write() = std::sync::Arc::new(set),
        Err(e) => {
            tracing::error!(error = %e, "invalid approval patterns in reloaded config — keeping previous set");
        }
    }
}

/// Spawn the watcher task. Returns immediately; the task runs for the
/// process lifetime.
pub fn spawn_config_watcher(state: AppState, config_path: PathBuf) {
    tokio::spawn(async move {
        let mut last_mtime = match std::fs::metadata(&config_path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => {
                tracing::warn!(path = %config_path.display(), "config file not found — hot reload disabled");
                return;
            }
        };

        tracing::info!(path = %config_path.display(), "config watcher started");

        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;

            let Ok(mtime) = std::fs::metadata(&config_path).and_then(|m| m.modified()) else {
                continue;
            };
            if mtime <= last_mtime {
                continue;
            }
            last_mtime = mtime;

            let new_config = match Config::load(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "config reload failed — keeping running config");
                    continue;
                }
            };

            let issues = new_config.validate();
            let has_errors = issues.iter().any(|i| i.severity == ConfigSeverity::Error);
            for issue in &issues {
                tracing::warn!("config reload: {issue}");
            }
            if has_errors {
                tracing::error!("reloaded config has errors — keeping running config");
                continue;
            }

            let old = state.config.get();
            let needs_restart = restart_required(&old, &new_config);
            TraceEvent::ConfigReloaded {
                restart_required: needs_restart,
            }
            .emit();

            if needs_restart {
                tracing::warn!("config change requires restart — not hot-applying");
                state.connections.broadcast(
                    GatewayEvent::ConfigRestartRequired {
                        reason: "bind address, auth, or provider set changed".into(),
                    },
                    None,
                );
                continue;
            }

            apply_derived(&state, &new_config);
            state.config.swap(new_config);
            tracing::info!("config hot-applied");
        }
    });
}
