//! Connection authentication.
//!
//! Two credential forms: the static gateway secret (compared in
//! constant time via SHA-256 digests) and device tokens issued through
//! pairing. A missing credential is `Unauthenticated`; a present but
//! unknown or expired one is `Unauthorized` — during the handshake
//! window both close the connection.

pub mod tokens;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use ag_domain::error::{Error, Result};
use ag_protocol::{AuthInfo, Role};

use crate::state::AppState;

/// Hash the static secret once at startup. `None` = dev mode.
pub fn static_token_hash(config: &ag_domain::config::AuthConfig) -> Option<Vec<u8>> {
    match std::env::var(&config.token_env) {
        Ok(secret) if !secret.is_empty() => Some(Sha256::digest(secret.as_bytes()).to_vec()),
        _ => {
            tracing::warn!(
                env = %config.token_env,
                "no gateway secret configured — accepting unauthenticated connections (dev mode)"
            );
            None
        }
    }
}

/// Constant-time comparison against the startup-computed digest.
/// Hashing normalizes lengths so `ct_eq` always compares 32 bytes.
pub fn verify_static(expected_hash: &[u8], provided: &str) -> bool {
    let provided_hash = Sha256::digest(provided.as_bytes());
    provided_hash.ct_eq(expected_hash).into()
}

/// Authenticate a connection credential.
///
/// Resolution order: static secret, then device token. Dev mode (no
/// static secret configured) accepts missing credentials as operator.
pub fn authenticate(state: &AppState, credential: Option<&str>) -> Result<AuthInfo> {
    let credential = match credential {
        Some(c) if !c.is_empty() => c,
        _ => {
            return match &state.static_token_hash {
                None => Ok(AuthInfo {
                    role: Role::Operator,
                    scopes: vec!["*".into()],
                    device_token: None,
                }),
                Some(_) => Err(Error::Unauthenticated("missing credential".into())),
            };
        }
    };

    if let Some(expected) = &state.static_token_hash {
        if verify_static(expected, credential) {
            return Ok(AuthInfo {
                role: Role::Operator,
                scopes: vec!["*".into()],
                device_token: None,
            });
        }
    }

    if let Some(device) = state.tokens.validate(credential) {
        return Ok(AuthInfo {
            role: device.role,
            scopes: device.scopes,
            device_token: Some(device.token),
        });
    }

    Err(Error::Unauthorized("unknown or expired credential".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_static_matches_only_exact_secret() {
        let hash = Sha256::digest(b"s3cret").to_vec();
        assert!(verify_static(&hash, "s3cret"));
        assert!(!verify_static(&hash, "s3cret "));
        assert!(!verify_static(&hash, ""));
        assert!(!verify_static(&hash, "a-much-longer-wrong-credential"));
    }
}
