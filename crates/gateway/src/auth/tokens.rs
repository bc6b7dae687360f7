//! Device token manager.
//!
//! Tokens are opaque URL-safe bearer strings (32 random bytes,
//! base64url). A device holds at most one active token: issuing a new
//! one revokes the prior atomically (revoke-then-insert under one
//! lock, then persist). The database lives at `{root}/tokens.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use ag_domain::error::{Error, Result};
use ag_domain::trace::TraceEvent;
use ag_protocol::Role;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub token: String,
    pub device_id: String,
    pub role: Role,
    pub scopes: Vec<String>,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds; `None` = no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl DeviceToken {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at.is_some_and(|exp| now_secs > exp)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct TokenState {
    by_token: HashMap<String, DeviceToken>,
    by_device: HashMap<String, String>,
}

#[derive(Debug)]
pub struct TokenManager {
    path: PathBuf,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Load the token database from `{root}/tokens.json` (absent or
    /// unreadable file = empty).
    pub fn load(root: &Path) -> Self {
        let path = root.join("tokens.json");
        let tokens: Vec<DeviceToken> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let mut by_token = HashMap::new();
        let mut by_device = HashMap::new();
        for token in tokens {
            by_device.insert(token.device_id.clone(), token.token.clone());
            by_token.insert(token.token.clone(), token);
        }

        Self {
            path,
            state: Mutex::new(TokenState {
                by_token,
                by_device,
            }),
        }
    }

    /// Issue a token for a device, revoking any prior one.
    pub fn issue(
        &self,
        device_id: &str,
        role: Role,
        scopes: Vec<String>,
        expires_in_days: Option<u32>,
    ) -> Result<DeviceToken> {
        let now = chrono::Utc::now().timestamp();
        let token = DeviceToken {
            token: generate_token(),
            device_id: device_id.to_owned(),
            role,
            scopes,
            created_at: now,
            expires_at: expires_in_days.map(|d| now + i64::from(d) * 24 * 60 * 60),
        };

        {
            let mut state = self.state.lock();
            if let Some(old) = state.by_device.remove(device_id) {
                state.by_token.remove(&old);
            }
            state
                .by_device
                .insert(device_id.to_owned(), token.token.clone());
            state.by_token.insert(token.token.clone(), token.clone());
            self.persist(&state)?;
        }

        TraceEvent::TokenIssued {
            device_id: device_id.to_owned(),
            role: role.as_str().to_owned(),
        }
        .emit();

        Ok(token)
    }

    /// Validate a bearer token. Expired tokens are evicted on lookup.
    pub fn validate(&self, token: &str) -> Option<DeviceToken> {
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state.lock();
        let entry = state.by_token.get(token)?.clone();
        if entry.is_expired(now) {
            state.by_token.remove(token);
            if state.by_device.get(&entry.device_id) == Some(&entry.token) {
                state.by_device.remove(&entry.device_id);
            }
            let _ = self.persist(&state);
            return None;
        }
        Some(entry)
    }

    /// Mint a fresh token for a device, keeping its role and scopes.
    pub fn rotate(&self, device_id: &str) -> Result<DeviceToken> {
        let existing = {
            let state = self.state.lock();
            state
                .by_device
                .get(device_id)
                .and_then(|t| state.by_token.get(t))
                .cloned()
        }
        .ok_or_else(|| Error::Unauthorized(format!("no token for device {device_id}")))?;

        self.issue(device_id, existing.role, existing.scopes, None)
    }

    /// Revoke by token value. Returns `false` for unknown tokens.
    pub fn revoke(&self, token: &str) -> Result<bool> {
        let mut state = self.state.lock();
        match state.by_token.remove(token) {
            Some(entry) => {
                if state.by_device.get(&entry.device_id) == Some(&entry.token) {
                    state.by_device.remove(&entry.device_id);
                }
                self.persist(&state)?;
                TraceEvent::TokenRevoked {
                    device_id: entry.device_id,
                }
                .emit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get_by_device(&self, device_id: &str) -> Option<DeviceToken> {
        let state = self.state.lock();
        state
            .by_device
            .get(device_id)
            .and_then(|t| state.by_token.get(t))
            .cloned()
    }

    pub fn list(&self) -> Vec<DeviceToken> {
        self.state.lock().by_token.values().cloned().collect()
    }

    /// Sweep expired tokens. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .by_token
            .values()
            .filter(|t| t.is_expired(now))
            .map(|t| t.token.clone())
            .collect();

        for token in &expired {
            if let Some(entry) = state.by_token.remove(token) {
                if state.by_device.get(&entry.device_id) == Some(&entry.token) {
                    state.by_device.remove(&entry.device_id);
                }
            }
        }
        if !expired.is_empty() {
            self.persist(&state)?;
        }
        Ok(expired.len())
    }

    fn persist(&self, state: &TokenState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let tokens: Vec<&DeviceToken> = state.by_token.values().collect();
        let json = serde_json::to_string_pretty(&tokens)
            .map_err(|e| Error::Other(format!("serializing tokens: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
