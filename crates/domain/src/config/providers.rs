use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which registered model provider serves turns by default. Concrete
/// providers are registered at startup by the embedding binary; this
/// config only names them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "d_default")]
    pub default: String,

    /// Default model identifier passed through to the provider.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: d_default(),
            model: None,
        }
    }
}

fn d_default() -> String {
    "default".into()
}
