use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the static gateway secret.
    /// Unset/empty = dev mode: unauthenticated connections are accepted
    /// (a warning is logged once at startup).
    #[serde(default = "d_token_env")]
    pub token_env: String,

    /// Allow the HTTP chat-completions façade to create sessions for
    /// unknown users. Off in production: unknown sessions are rejected.
    #[serde(default)]
    pub auto_create_sessions: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: d_token_env(),
            auto_create_sessions: false,
        }
    }
}

fn d_token_env() -> String {
    "AG_GATEWAY_TOKEN".into()
}
