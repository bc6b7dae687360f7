//! Cancellation tokens for in-flight turns, keyed by session.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh token for a session's turn. A previous token for
    /// the same session is cancelled first.
    pub fn register(&self, session_key: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(old) = self
            .tokens
            .lock()
            .insert(session_key.to_owned(), token.clone())
        {
            old.cancel();
        }
        token
    }

    /// Cancel the active turn for a session. Returns `true` if one was
    /// registered.
    pub fn cancel(&self, session_key: &str) -> bool {
        match self.tokens.lock().remove(session_key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, session_key: &str) {
        self.tokens.lock().remove(session_key);
    }

    /// Cancel everything (shutdown path).
    pub fn cancel_all(&self) {
        for (_, token) in self.tokens.lock().drain() {
            token.cancel();
        }
    }
}
