//! Notification backend capability and registry.
//!
//! The escalation core is polymorphic over backends: it only knows opaque id
//! strings. Implementations are registered at startup; there is no runtime
//! discovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use oncore_core::incident::IncidentView;
use oncore_core::user::User;

use crate::error::Result;

/// A notification channel implementation.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Stable backend identifier ("email", "sms", "mobile_push", ...).
    fn id(&self) -> &str;

    /// Deliver one notification to one user.
    async fn notify(&self, user: &User, incident: &IncidentView) -> Result<()>;
}

/// Registry mapping backend ids to implementations.
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn NotificationBackend>>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Register a backend under its own id.
    pub async fn register(&self, backend: Arc<dyn NotificationBackend>) {
        let id = backend.id().to_string();
        self.backends.write().await.insert(id, backend);
    }

    /// Look up a backend by id.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn NotificationBackend>> {
        self.backends.read().await.get(id).cloned()
    }

    /// Remove a backend. Returns whether it was registered.
    pub async fn remove(&self, id: &str) -> bool {
        self.backends.write().await.remove(id).is_some()
    }

    /// List registered backend ids.
    pub async fn ids(&self) -> Vec<String> {
        self.backends.read().await.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    #[tokio::test]
    async fn test_registry() {
        let registry = BackendRegistry::new();
        registry
            .register(Arc::new(MemoryBackend::new("memory")))
            .await;

        assert!(registry.get("memory").await.is_some());
        assert!(registry.get("sms").await.is_none());
        assert_eq!(registry.ids().await, vec!["memory".to_string()]);

        assert!(registry.remove("memory").await);
        assert!(!registry.remove("memory").await);
    }
}
