//! Gateway-owned session store.
//!
//! Session metadata lives in `sessions.json` under `{root}/sessions/`;
//! the message history itself lives in per-session JSONL transcripts.
//! Creation is lazy: the router hands a resolved key to
//! [`SessionStore::resolve_or_create`]. Sessions are never destroyed
//! implicitly — transcripts are retained until an explicit delete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ag_domain::config::RoutePeer;
use ag_domain::error::{Error, Result};
use ag_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Authoritative per-conversation state (metadata only — messages live
/// in the transcript).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_key: String,
    pub session_id: String,
    pub agent_id: String,
    pub channel: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub peer: Option<RoutePeer>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic activity marker used by dedupe and compaction.
    pub last_activity_at: DateTime<Utc>,
}

/// Metadata for lazily created sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionInit {
    pub agent_id: String,
    pub channel: String,
    pub account_id: String,
    pub peer: Option<RoutePeer>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory session index backed by a JSON file.
#[derive(Debug)]
pub struct SessionStore {
    sessions_path: PathBuf,
    sessions_dir: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// Load or create the store at `{root}/sessions/sessions.json`.
    pub fn new(root: &Path) -> Result<Self> {
        let dir = root.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions: HashMap<String, SessionEntry> = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions_dir: dir,
            sessions: RwLock::new(sessions),
        })
    }

    /// Directory holding transcripts and lock files.
    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Resolve or lazily create a session. Returns `(entry, is_new)`.
    pub fn resolve_or_create(&self, session_key: &str, init: SessionInit) -> (SessionEntry, bool) {
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(session_key) {
                return (entry.clone(), false);
            }
        }

        let now = Utc::now();
        let session_id = uuid::Uuid::new_v4().to_string();
        let entry = SessionEntry {
            session_key: session_key.to_owned(),
            session_id: session_id.clone(),
            agent_id: init.agent_id,
            channel: init.channel,
            account_id: init.account_id,
            peer: init.peer,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        };

        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_key.to_owned())
            .or_insert(entry)
            .clone();

        TraceEvent::SessionResolved {
            session_key: session_key.to_owned(),
            session_id,
            is_new: true,
        }
        .emit();

        (entry, true)
    }

    /// Bump `updated_at` / `last_activity_at`.
    pub fn touch(&self, session_key: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            let now = Utc::now();
            entry.updated_at = now;
            entry.last_activity_at = now;
        }
    }

    pub fn list(&self) -> Vec<SessionEntry> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove the in-memory entry. The caller removes the transcript via
    /// [`crate::TranscriptWriter::remove`].
    pub fn delete(&self, session_key: &str) -> bool {
        let removed = self.sessions.write().remove(session_key).is_some();
        if removed {
            TraceEvent::SessionDeleted {
                session_key: session_key.to_owned(),
            }
            .emit();
        }
        removed
    }

    /// Persist the index to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions)
            .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?;
        std::fs::write(&self.sessions_path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn init() -> SessionInit {
        SessionInit {
            agent_id: "main".into(),
            channel: "telegram".into(),
            account_id: String::new(),
            peer: None,
        }
    }

    #[test]
    fn create_is_lazy_and_idempotent() {
        let (_dir, store) = store();
        let (first, is_new) = store.resolve_or_create("k1", init());
        assert!(is_new);

        let (second, is_new) = store.resolve_or_create("k1", init());
        assert!(!is_new);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn touch_advances_activity() {
        let (_dir, store) = store();
        let (entry, _) = store.resolve_or_create("k1", init());
        store.touch("k1");
        let after = store.get("k1").unwrap();
        assert!(after.last_activity_at >= entry.last_activity_at);
    }

    #[test]
    fn flush_and_reload_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.resolve_or_create("k1", init());
        store.flush().unwrap();

        let reloaded = SessionStore::new(dir.path()).unwrap();
        assert!(reloaded.get("k1").is_some());
    }

    #[test]
    fn delete_removes_entry() {
        let (_dir, store) = store();
        store.resolve_or_create("k1", init());
        assert!(store.delete("k1"));
        assert!(store.get("k1").is_none());
        assert!(!store.delete("k1"));
    }
}
