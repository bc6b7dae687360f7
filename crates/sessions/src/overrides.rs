//! Per-session model overrides.
//!
//! Lets individual sessions pin a provider, model, or think level.
//! Persisted at `{root}/session_overrides.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ag_domain::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think_level: Option<String>,
}

/// Effective provider/model after applying a session's override.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveModel {
    pub provider: String,
    pub model: Option<String>,
    pub think_level: Option<String>,
}

#[derive(Debug)]
pub struct SessionOverrides {
    path: PathBuf,
    entries: RwLock<HashMap<String, OverrideEntry>>,
}

impl SessionOverrides {
    /// Load overrides from `{root}/session_overrides.json` (missing or
    /// unreadable file = empty).
    pub fn load(root: &Path) -> Self {
        let path = root.join("session_overrides.json");
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn get(&self, session_key: &str) -> Option<OverrideEntry> {
        self.entries.read().get(session_key).cloned()
    }

    pub fn set(&self, session_key: &str, entry: OverrideEntry) -> Result<()> {
        self.entries.write().insert(session_key.to_owned(), entry);
        self.save()
    }

    pub fn clear(&self, session_key: &str) -> Result<()> {
        if self.entries.write().remove(session_key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Overlay a session's override on the configured defaults.
    pub fn apply(
        &self,
        session_key: &str,
        default_provider: &str,
        default_model: Option<&str>,
    ) -> EffectiveModel {
        let entry = self.get(session_key).unwrap_or_default();
        EffectiveModel {
            provider: entry
                .provider
                .unwrap_or_else(|| default_provider.to_owned()),
            model: entry.model.or_else(|| default_model.map(String::from)),
            think_level: entry.think_level,
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let entries = self.entries.read();
        let json = serde_json::to_string_pretty(&*entries)
            .map_err(|e| Error::Other(format!("serializing overrides: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}
