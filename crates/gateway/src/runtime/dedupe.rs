//! Idempotency cache for duplicate-request suppression.
//!
//! Maps caller-namespaced keys (`"chat:{idempotencyKey}"`) to the prior
//! outcome. A hit within the TTL bypasses the operation entirely and
//! the caller returns the cached outcome unchanged. Reads never extend
//! the TTL; expired entries are evicted on lookup.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use ag_protocol::ErrorShape;

/// Cached outcome of an idempotent operation.
#[derive(Debug, Clone)]
pub struct DedupeEntry {
    pub ts: Instant,
    pub ok: bool,
    pub payload: Option<Value>,
    pub error: Option<ErrorShape>,
}

#[derive(Debug)]
pub struct DedupeCache {
    entries: Mutex<HashMap<String, DedupeEntry>>,
    ttl: Duration,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached entry iff still within the TTL. An expired entry is
    /// removed on this lookup and `None` is returned.
    pub fn get(&self, key: &str) -> Option<DedupeEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.ts.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Record an outcome, overwriting any prior entry for the key.
    pub fn set(&self, key: &str, ok: bool, payload: Option<Value>, error: Option<ErrorShape>) {
        self.entries.lock().insert(
            key.to_owned(),
            DedupeEntry {
                ts: Instant::now(),
                ok,
                payload,
                error,
            },
        );
    }

    /// Evict all expired entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.ts.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
