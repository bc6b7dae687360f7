//! Approval gate for dangerous tool calls.
//!
//! Calls whose command shape matches the configured danger set pause
//! until a human approves or denies them (via the `tools.approve`
//! method). Approvals can be sticky: remembered per session and command
//! shape. An unapproved call fails with `ApprovalRequired`; a timeout
//! counts as unapproved.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use ag_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The decision made by a human reviewer.
#[derive(Debug)]
pub enum ApprovalDecision {
    Approved { sticky: bool },
    Denied { reason: Option<String> },
}

/// A pending approval waiting for review.
#[derive(Debug)]
pub struct PendingApproval {
    pub id: Uuid,
    pub session_key: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    respond: oneshot::Sender<ApprovalDecision>,
}

/// Serializable snapshot of a pending approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalInfo {
    pub id: Uuid,
    pub session_key: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingApproval> for ApprovalInfo {
    fn from(p: &PendingApproval) -> Self {
        Self {
            id: p.id,
            session_key: p.session_key.clone(),
            command: p.command.clone(),
            created_at: p.created_at,
        }
    }
}

/// Reduce a tool call to the shape approvals key on: the tool name plus
/// the first token of a `command` argument, when present.
pub fn command_shape(tool_name: &str, params: &Value) -> String {
    let first_token = params
        .get("command")
        .and_then(|v| v.as_str())
        .and_then(|c| c.split_whitespace().next());
    match first_token {
        Some(token) => format!("{tool_name} {token}"),
        None => tool_name.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pending approvals plus the sticky per-session decision set.
#[derive(Debug)]
pub struct ApprovalStore {
    pending: RwLock<HashMap<Uuid, PendingApproval>>,
    sticky: RwLock<HashSet<(String, String)>>,
    timeout: Duration,
}

impl ApprovalStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            sticky: RwLock::new(HashSet::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether this session already holds a sticky approval for the shape.
    pub fn is_sticky_approved(&self, session_key: &str, shape: &str) -> bool {
        self.sticky
            .read()
            .contains(&(session_key.to_owned(), shape.to_owned()))
    }

    /// Wait for a decision on a dangerous call. Returns `Ok(())` when
    /// approved; `ApprovalRequired` on denial or timeout.
    ///
    /// `announce` is invoked with the pending snapshot so the caller can
    /// broadcast the request to reviewers.
    pub async fn require_approval(
        &self,
        session_key: &str,
        shape: &str,
        announce: impl FnOnce(ApprovalInfo),
    ) -> Result<()> {
        if self.is_sticky_approved(session_key, shape) {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            id: Uuid::new_v4(),
            session_key: session_key.to_owned(),
            command: shape.to_owned(),
            created_at: Utc::now(),
            respond: tx,
        };
        let id = pending.id;
        let info = ApprovalInfo::from(&pending);
        self.pending.write().insert(id, pending);
        announce(info);

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(ApprovalDecision::Approved { sticky })) => {
                if sticky {
                    self.sticky
                        .write()
                        .insert((session_key.to_owned(), shape.to_owned()));
                }
                Ok(())
            }
            Ok(Ok(ApprovalDecision::Denied { reason })) => Err(Error::ApprovalRequired(
                reason.unwrap_or_else(|| format!("denied: {shape}")),
            )),
            Ok(Err(_)) => Err(Error::ApprovalRequired(format!(
                "approval channel closed: {shape}"
            ))),
            Err(_) => {
                self.pending.write().remove(&id);
                Err(Error::ApprovalRequired(format!(
                    "no decision within {}s: {shape}",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Resolve a pending approval. Returns `false` for unknown IDs.
    pub fn resolve(&self, id: &Uuid, decision: ApprovalDecision) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(decision);
            return true;
        }
        false
    }

    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending.read().values().map(ApprovalInfo::from).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ApprovalStore {
        ApprovalStore::new(Duration::from_millis(200))
    }

    #[test]
    fn command_shape_uses_first_token() {
        assert_eq!(
            command_shape("exec", &serde_json::json!({ "command": "rm -rf /tmp/x" })),
            "exec rm"
        );
        assert_eq!(command_shape("write", &serde_json::json!({ "path": "a" })), "write");
    }

    #[tokio::test]
    async fn approve_unblocks_waiter() {
        let store = store();
        let (info_tx, info_rx) = oneshot::channel();

        let fut = store.require_approval("s1", "exec rm", move |info| {
            let _ = info_tx.send(info);
        });
        let decide = async {
            let info = info_rx.await.unwrap();
            assert!(store.resolve(&info.id, ApprovalDecision::Approved { sticky: false }));
        };

        let (result, ()) = tokio::join!(fut, decide);
        assert!(result.is_ok());
        assert!(store.list_pending().is_empty());
    }

    #[tokio::test]
    async fn deny_fails_with_approval_required() {
        let store = store();
        let (info_tx, info_rx) = oneshot::channel();

        let fut = store.require_approval("s1", "exec rm", move |info| {
            let _ = info_tx.send(info);
        });
        let decide = async {
            let info = info_rx.await.unwrap();
            store.resolve(
                &info.id,
                ApprovalDecision::Denied {
                    reason: Some("too dangerous".into()),
                },
            );
        };

        let (result, ()) = tokio::join!(fut, decide);
        let err = result.unwrap_err();
        assert_eq!(err.code(), "approval_required");
        assert!(err.to_string().contains("too dangerous"));
    }

    #[tokio::test]
    async fn timeout_counts_as_unapproved() {
        let store = ApprovalStore::new(Duration::from_millis(30));
        let err = store
            .require_approval("s1", "exec rm", |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.code(), "approval_required");
        assert!(store.list_pending().is_empty());
    }

    #[tokio::test]
    async fn sticky_approval_skips_the_gate() {
        let store = store();
        let (info_tx, info_rx) = oneshot::channel();

        let fut = store.require_approval("s1", "exec rm", move |info| {
            let _ = info_tx.send(info);
        });
        let decide = async {
            let info = info_rx.await.unwrap();
            store.resolve(&info.id, ApprovalDecision::Approved { sticky: true });
        };
        let (result, ()) = tokio::join!(fut, decide);
        assert!(result.is_ok());

        // Second call: no announcement, immediate pass.
        let result = store
            .require_approval("s1", "exec rm", |_| panic!("should not announce"))
            .await;
        assert!(result.is_ok());

        // Different session: gate applies again (times out here).
        let store2 = ApprovalStore::new(Duration::from_millis(20));
        assert!(store2.require_approval("s2", "exec rm", |_| {}).await.is_err());
    }

    #[test]
    fn resolve_unknown_id_returns_false() {
        let store = store();
        assert!(!store.resolve(&Uuid::new_v4(), ApprovalDecision::Approved { sticky: false }));
    }
}
