//! Remote tool invocation over node connections.
//!
//! The gateway sends a `node.invoke.request` event on the node's
//! connection and parks the caller on a oneshot until the node answers
//! with the `node.invoke.result` method (or the timeout fires). Pending
//! requests are bounded per node and globally, and drained when a node
//! disconnects.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use ag_domain::error::{Error, Result};
use ag_domain::trace::TraceEvent;
use ag_protocol::GatewayEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome reported by a node.
#[derive(Debug, Clone)]
pub struct NodeInvokeOutcome {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

#[derive(Debug)]
struct PendingRequest {
    conn_id: String,
    tx: oneshot::Sender<NodeInvokeOutcome>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NodeInvoker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct NodeInvoker {
    pending: Mutex<HashMap<String, PendingRequest>>,
    timeout: Duration,
    max_pending_per_node: usize,
    max_pending_global: usize,
}

impl NodeInvoker {
    pub fn new(timeout: Duration, max_pending_per_node: usize, max_pending_global: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            max_pending_per_node,
            max_pending_global,
        }
    }

    /// Dispatch a tool call to a node connection. `send` delivers the
    /// request event on that connection and returns `false` when the
    /// connection is gone.
    pub async fn dispatch(
        &self,
        conn_id: &str,
        tool: &str,
        args: Value,
        session_key: Option<String>,
        send: impl FnOnce(GatewayEvent) -> bool,
    ) -> Result<NodeInvokeOutcome> {
        // Bounded pending: one wedged node must not absorb the gateway.
        {
            let pending = self.pending.lock();
            if self.max_pending_global > 0 && pending.len() >= self.max_pending_global {
                return Err(Error::ToolExecution(format!(
                    "global pending limit reached ({} node requests in flight)",
                    pending.len()
                )));
            }
            if self.max_pending_per_node > 0 {
                let node_count = pending.values().filter(|p| p.conn_id == conn_id).count();
                if node_count >= self.max_pending_per_node {
                    return Err(Error::ToolExecution(format!(
                        "per-node pending limit reached ({node_count} requests for {conn_id})"
                    )));
                }
            }
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                conn_id: conn_id.to_owned(),
                tx,
            },
        );

        let sent = send(GatewayEvent::NodeInvokeRequest {
            request_id: request_id.clone(),
            tool: tool.to_owned(),
            args,
            session_key,
        });
        if !sent {
            self.pending.lock().remove(&request_id);
            return Err(Error::ToolExecution(format!(
                "node connection {conn_id} is gone"
            )));
        }

        TraceEvent::ToolDispatched {
            tool: tool.to_owned(),
            routed_to: format!("node:{conn_id}"),
        }
        .emit();

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::ToolExecution(format!(
                "node {conn_id} disconnected before responding"
            ))),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(Error::ToolExecution(format!(
                    "node request to {conn_id} timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Called when a node reports a result. Returns `false` for unknown
    /// request IDs (late results after timeout are dropped here).
    pub fn complete(&self, request_id: &str, outcome: NodeInvokeOutcome) -> bool {
        match self.pending.lock().remove(request_id) {
            Some(pending) => {
                let _ = pending.tx.send(outcome);
                true
            }
            None => {
                tracing::warn!(request_id = %request_id, "node.invoke.result for unknown request");
                false
            }
        }
    }

    /// Fail every in-flight request owned by a disconnected node.
    /// Returns the number of requests failed.
    pub fn fail_pending_for(&self, conn_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.conn_id == conn_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(p) = pending.remove(id) {
                let _ = p.tx.send(NodeInvokeOutcome {
                    success: false,
                    result: Value::Null,
                    error: Some(format!("node {conn_id} disconnected")),
                });
            }
        }

        if !ids.is_empty() {
            tracing::warn!(
                conn_id = %conn_id,
                failed = ids.len(),
                "failed in-flight requests for disconnected node"
            );
        }
        ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn invoker(timeout_ms: u64) -> NodeInvoker {
        NodeInvoker::new(Duration::from_millis(timeout_ms), 50, 200)
    }

    #[tokio::test]
    async fn result_completes_dispatch() {
        let invoker = Arc::new(invoker(1_000));
        let (req_tx, req_rx) = oneshot::channel::<String>();

        let invoker2 = invoker.clone();
        let completer = tokio::spawn(async move {
            let request_id = req_rx.await.unwrap();
            invoker2.complete(
                &request_id,
                NodeInvokeOutcome {
                    success: true,
                    result: serde_json::json!({ "screenshot": "…" }),
                    error: None,
                },
            );
        });

        let outcome = invoker
            .dispatch("conn-1", "screen.capture", Value::Null, None, move |ev| {
                if let GatewayEvent::NodeInvokeRequest { request_id, .. } = ev {
                    let _ = req_tx.send(request_id);
                }
                true
            })
            .await
            .unwrap();

        completer.await.unwrap();
        assert!(outcome.success);
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test]
    async fn timeout_fails_and_cleans_up() {
        let invoker = invoker(30);
        let err = invoker
            .dispatch("conn-1", "slow.tool", Value::Null, None, |_| true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_execution_error");
        assert!(err.to_string().contains("timed out"));
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test]
    async fn dead_connection_fails_immediately() {
        let invoker = invoker(1_000);
        let err = invoker
            .dispatch("conn-1", "t", Value::Null, None, |_| false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone"));
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_drains_only_that_node() {
        let invoker = Arc::new(invoker(5_000));

        let mut handles = Vec::new();
        for (conn, tool) in [("n1", "a"), ("n1", "b"), ("n2", "c")] {
            let invoker = invoker.clone();
            handles.push(tokio::spawn(async move {
                invoker
                    .dispatch(conn, tool, Value::Null, None, |_| true)
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invoker.pending_count(), 3);

        assert_eq!(invoker.fail_pending_for("n1"), 2);
        assert_eq!(invoker.pending_count(), 1);

        // The two n1 dispatches resolved with a disconnect outcome.
        let mut disconnected = 0;
        for h in handles.drain(..2) {
            let outcome = h.await.unwrap().unwrap();
            assert!(!outcome.success);
            disconnected += 1;
        }
        assert_eq!(disconnected, 2);
    }

    #[tokio::test]
    async fn late_result_is_dropped() {
        let invoker = invoker(20);
        let mut captured = None;
        let _ = invoker
            .dispatch("n1", "t", Value::Null, None, |ev| {
                if let GatewayEvent::NodeInvokeRequest { request_id, .. } = ev {
                    captured = Some(request_id);
                }
                true
            })
            .await;

        let request_id = captured.unwrap();
        assert!(!invoker.complete(
            &request_id,
            NodeInvokeOutcome {
                success: true,
                result: Value::Null,
                error: None,
            }
        ));
    }
}
