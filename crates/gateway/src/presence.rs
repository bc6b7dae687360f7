//! Presence registry — who is connected, with a monotone state version.
//!
//! Every mutation bumps `state_version`; the connection layer
//! broadcasts the fresh snapshot so clients can discard stale views.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use ag_domain::trace::TraceEvent;
use ag_protocol::{PresenceEntry, PresenceKind, PresenceSnapshot};

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, PresenceEntry>,
    state_version: u64,
}

#[derive(Debug)]
pub struct PresenceRegistry {
    inner: RwLock<Inner>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                state_version: 0,
            }),
        }
    }

    /// Register or replace a principal. Returns the new snapshot.
    pub fn register(
        &self,
        id: &str,
        kind: PresenceKind,
        version: &str,
        metadata: serde_json::Value,
    ) -> PresenceSnapshot {
        let now = Utc::now().to_rfc3339();
        let mut inner = self.inner.write();
        inner.entries.insert(
            id.to_owned(),
            PresenceEntry {
                id: id.to_owned(),
                kind,
                version: version.to_owned(),
                since: now.clone(),
                last_seen: now,
                metadata,
            },
        );
        inner.state_version += 1;
        TraceEvent::PresenceChanged {
            id: id.to_owned(),
            state_version: inner.state_version,
        }
        .emit();
        snapshot_of(&inner)
    }

    /// Update `last_seen` without bumping the state version (activity is
    /// not a membership change).
    pub fn touch(&self, id: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.last_seen = Utc::now().to_rfc3339();
        }
    }

    /// Remove a principal. Returns the new snapshot when it was present.
    pub fn unregister(&self, id: &str) -> Option<PresenceSnapshot> {
        let mut inner = self.inner.write();
        if inner.entries.remove(id).is_none() {
            return None;
        }
        inner.state_version += 1;
        TraceEvent::PresenceChanged {
            id: id.to_owned(),
            state_version: inner.state_version,
        }
        .emit();
        Some(snapshot_of(&inner))
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        snapshot_of(&self.inner.read())
    }

    pub fn state_version(&self) -> u64 {
        self.inner.read().state_version
    }
}

fn snapshot_of(inner: &Inner) -> PresenceSnapshot {
    let mut entries: Vec<PresenceEntry> = inner.entries.values().cloned().collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    PresenceSnapshot {
        entries,
        state_version: inner.state_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister_bump_version() {
        let registry = PresenceRegistry::new();
        assert_eq!(registry.state_version(), 0);

        let snap = registry.register("c1", PresenceKind::Client, "0.1.0", serde_json::Value::Null);
        assert_eq!(snap.state_version, 1);
        assert_eq!(snap.entries.len(), 1);

        let snap = registry.unregister("c1").unwrap();
        assert_eq!(snap.state_version, 2);
        assert!(snap.entries.is_empty());

        assert!(registry.unregister("c1").is_none());
        assert_eq!(registry.state_version(), 2);
    }

    #[test]
    fn versions_strictly_increase() {
        let registry = PresenceRegistry::new();
        let mut last = 0;
        for i in 0..5 {
            let snap = registry.register(
                &format!("c{i}"),
                PresenceKind::Node,
                "0.1.0",
                serde_json::Value::Null,
            );
            assert!(snap.state_version > last);
            last = snap.state_version;
        }
    }

    #[test]
    fn touch_does_not_bump_version() {
        let registry = PresenceRegistry::new();
        registry.register("c1", PresenceKind::Client, "0.1.0", serde_json::Value::Null);
        let before = registry.state_version();
        registry.touch("c1");
        assert_eq!(registry.state_version(), before);
    }
}
