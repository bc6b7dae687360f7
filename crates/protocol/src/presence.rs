use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Presence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The set of currently connected principals. `state_version` increases
/// on every registry mutation so clients can discard stale snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub entries: Vec<PresenceEntry>,
    pub state_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub id: String,
    pub kind: PresenceKind,
    pub version: String,
    /// ISO-8601 connect time.
    pub since: String,
    /// ISO-8601 last activity.
    pub last_seen: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Gateway,
    Client,
    Node,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_camel_case() {
        let entry = PresenceEntry {
            id: "gw".into(),
            kind: PresenceKind::Gateway,
            version: "0.1.0".into(),
            since: "2026-01-01T00:00:00Z".into(),
            last_seen: "2026-01-01T00:05:00Z".into(),
            metadata: serde_json::Value::Null,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "gateway");
        assert_eq!(json["lastSeen"], "2026-01-01T00:05:00Z");
        assert!(json.get("metadata").is_none());
    }
}
