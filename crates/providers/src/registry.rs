//! Provider registry — id-keyed lookup with a configured default.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use ag_domain::error::{Error, Result};

use crate::traits::ModelProvider;

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ModelProvider>>>,
    default_id: String,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .field("default_id", &self.default_id)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_id: default_id.into(),
        }
    }

    pub fn register(&self, provider: Arc<dyn ModelProvider>) {
        let id = provider.id().to_owned();
        tracing::info!(provider = %id, "model provider registered");
        self.providers.write().insert(id, provider);
    }

    /// Resolve a provider by id, falling back to the default.
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn ModelProvider>> {
        let id = id.unwrap_or(&self.default_id);
        self.providers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("no provider registered for \"{id}\"")))
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;

    #[test]
    fn resolves_default_and_explicit() {
        let registry = ProviderRegistry::new("scripted");
        registry.register(Arc::new(ScriptedProvider::new("scripted")));

        assert_eq!(registry.resolve(None).unwrap().id(), "scripted");
        assert_eq!(registry.resolve(Some("scripted")).unwrap().id(), "scripted");
    }

    #[test]
    fn missing_provider_is_an_error() {
        let registry = ProviderRegistry::new("none");
        let err = registry.resolve(None).unwrap_err();
        assert_eq!(err.code(), "provider_error");
    }
}
