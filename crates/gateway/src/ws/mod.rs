//! Connection layer: per-connection outbound serializers, broadcast
//! fan-out with monotone sequence numbers, and the bounded replay ring
//! for reconnect catch-up.

pub mod socket;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use ag_protocol::{Frame, GatewayEvent, Role};

/// Outbound queue depth per connection. A consumer that falls further
/// behind drops broadcast frames (gaps, not reordering).
const OUTBOUND_DEPTH: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live connection. The writer task drains `outbound`, so frames on
/// a connection are strictly ordered.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub conn_id: String,
    pub role: Role,
    pub scopes: Vec<String>,
    pub device_id: Option<String>,
    outbound: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Queue a frame. `false` when the connection is gone or its queue
    /// is full.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Whether this node connection advertises a tool (exact scope or
    /// prefix: `tool:files` serves `files.read`).
    pub fn serves_tool(&self, tool_name: &str) -> bool {
        self.role == Role::Node
            && self.scopes.iter().any(|scope| {
                scope.strip_prefix("tool:").is_some_and(|cap| {
                    tool_name == cap || tool_name.starts_with(&format!("{cap}."))
                })
            })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    /// Monotone sequence shared by all broadcast events.
    seq: AtomicU64,
    /// Recent broadcast frames for best-effort reconnect replay.
    replay: Mutex<VecDeque<(u64, Frame)>>,
    replay_depth: usize,
}

impl ConnectionRegistry {
    pub fn new(replay_depth: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            replay: Mutex::new(VecDeque::new()),
            replay_depth,
        }
    }

    /// Build a connection handle without making it visible to
    /// broadcasts. The socket layer queues the hello (and any replay)
    /// first, then calls [`attach`](Self::attach) — this keeps the
    /// hello strictly first on the channel.
    pub fn prepare(
        &self,
        conn_id: &str,
        role: Role,
        scopes: Vec<String>,
        device_id: Option<String>,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_DEPTH);
        let handle = Arc::new(ConnectionHandle {
            conn_id: conn_id.to_owned(),
            role,
            scopes,
            device_id,
            outbound: tx,
        });
        (handle, rx)
    }

    /// Make a prepared connection visible to broadcasts.
    pub fn attach(&self, handle: Arc<ConnectionHandle>) {
        self.connections
            .write()
            .insert(handle.conn_id.clone(), handle);
    }

    /// Prepare + attach in one step (no handshake frames to order).
    pub fn register(
        &self,
        conn_id: &str,
        role: Role,
        scopes: Vec<String>,
        device_id: Option<String>,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Frame>) {
        let (handle, rx) = self.prepare(conn_id, role, scopes, device_id);
        self.attach(handle.clone());
        (handle, rx)
    }

    pub fn remove(&self, conn_id: &str) {
        self.connections.write().remove(conn_id);
    }

    pub fn get(&self, conn_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(conn_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// First node connection advertising `tool_name`.
    pub fn find_node_for_tool(&self, tool_name: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .values()
            .find(|c| c.serves_tool(tool_name))
            .cloned()
    }

    /// Broadcast an event to every operator connection, stamped with the
    /// next sequence number, and record it in the replay ring.
    pub fn broadcast(&self, event: GatewayEvent, state_version: Option<u64>) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = event.into_frame(Some(seq), state_version);

        {
            let mut replay = self.replay.lock();
            replay.push_back((seq, frame.clone()));
            while replay.len() > self.replay_depth {
                replay.pop_front();
            }
        }

        for conn in self.connections.read().values() {
            if conn.role == Role::Operator && !conn.send(frame.clone()) {
                tracing::debug!(conn_id = %conn.conn_id, seq, "dropping broadcast frame (slow consumer)");
            }
        }
        seq
    }

    /// Send a targeted event (no broadcast seq) to one connection.
    pub fn send_to(&self, conn_id: &str, event: GatewayEvent) -> bool {
        match self.get(conn_id) {
            Some(conn) => conn.send(event.into_frame(None, None)),
            None => false,
        }
    }

    /// Best-effort catch-up: buffered broadcast frames after `last_seq`.
    pub fn replay_since(&self, last_seq: u64) -> Vec<Frame> {
        self.replay
            .lock()
            .iter()
            .filter(|(seq, _)| *seq > last_seq)
            .map(|(_, frame)| frame.clone())
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_event(n: usize) -> GatewayEvent {
        GatewayEvent::HealthProbe {
            channel: format!("ch{n}"),
        }
    }

    fn frame_seq(frame: &Frame) -> u64 {
        match frame {
            Frame::Event { seq, .. } => seq.expect("broadcast frame must carry seq"),
            _ => panic!("expected event frame"),
        }
    }

    #[tokio::test]
    async fn broadcast_seq_strictly_increases_per_connection() {
        let registry = ConnectionRegistry::new(16);
        let (_handle, mut rx) = registry.register("c1", Role::Operator, vec![], None);

        for i in 0..5 {
            registry.broadcast(probe_event(i), None);
        }

        let mut last = 0;
        for _ in 0..5 {
            let frame = rx.recv().await.unwrap();
            let seq = frame_seq(&frame);
            assert!(seq > last);
            last = seq;
        }
    }

    #[tokio::test]
    async fn nodes_do_not_receive_broadcasts() {
        let registry = ConnectionRegistry::new(16);
        let (_op, mut op_rx) = registry.register("op", Role::Operator, vec![], None);
        let (_node, mut node_rx) = registry.register("n1", Role::Node, vec![], None);

        registry.broadcast(probe_event(0), None);

        assert!(op_rx.recv().await.is_some());
        assert!(node_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replay_returns_only_frames_after_last_seq() {
        let registry = ConnectionRegistry::new(16);
        let mut seqs = Vec::new();
        for i in 0..4 {
            seqs.push(registry.broadcast(probe_event(i), None));
        }

        let frames = registry.replay_since(seqs[1]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frame_seq(&frames[0]), seqs[2]);
        assert_eq!(frame_seq(&frames[1]), seqs[3]);
    }

    #[tokio::test]
    async fn replay_ring_is_bounded() {
        let registry = ConnectionRegistry::new(3);
        for i in 0..10 {
            registry.broadcast(probe_event(i), None);
        }
        // Only the newest 3 remain; asking from zero returns those.
        assert_eq!(registry.replay_since(0).len(), 3);
    }

    #[tokio::test]
    async fn targeted_send_carries_no_seq() {
        let registry = ConnectionRegistry::new(16);
        let (_handle, mut rx) = registry.register("n1", Role::Node, vec![], None);

        assert!(registry.send_to(
            "n1",
            GatewayEvent::NodeInvokeRequest {
                request_id: "r1".into(),
                tool: "t".into(),
                args: serde_json::Value::Null,
                session_key: None,
            }
        ));

        match rx.recv().await.unwrap() {
            Frame::Event { seq, .. } => assert!(seq.is_none()),
            _ => panic!("expected event frame"),
        }
        assert!(!registry.send_to("missing", probe_event(0)));
    }

    #[tokio::test]
    async fn prepared_connection_is_invisible_until_attached() {
        let registry = ConnectionRegistry::new(16);
        let (handle, mut rx) = registry.prepare("c1", Role::Operator, vec![], None);

        registry.broadcast(probe_event(0), None);
        assert!(rx.try_recv().is_err(), "no broadcasts before attach");

        // Handshake frames queued first stay first.
        assert!(handle.send(Frame::ok("hello-slot", serde_json::Value::Null)));
        registry.attach(handle);
        registry.broadcast(probe_event(1), None);

        assert!(matches!(rx.recv().await.unwrap(), Frame::Res { .. }));
        assert!(matches!(rx.recv().await.unwrap(), Frame::Event { .. }));
    }

    #[test]
    fn serves_tool_matches_exact_and_prefix() {
        let registry = ConnectionRegistry::new(16);
        let (handle, _rx) = registry.register(
            "n1",
            Role::Node,
            vec!["tool:files".into(), "tool:screen.capture".into()],
            None,
        );

        assert!(handle.serves_tool("files"));
        assert!(handle.serves_tool("files.read"));
        assert!(handle.serves_tool("screen.capture"));
        assert!(!handle.serves_tool("filesystem"));
        assert!(registry.find_node_for_tool("files.read").is_some());
        assert!(registry.find_node_for_tool("browser").is_none());
    }
}
