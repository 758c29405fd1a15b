//! Device Identity
//!
//! Store-backed [`IdentityProvider`]: one identifier per installation,
//! generated on first use and reused afterwards.

use std::sync::Arc;

use platform::storage::KeyValueStore;
use tokio::sync::Mutex;

use crate::domain::repository::IdentityProvider;

pub struct DeviceIdentity<S>
where
    S: KeyValueStore,
{
    store: Arc<S>,
    key: String,
    /// Serializes first-use generation and caches the result
    cached: Mutex<Option<String>>,
}

impl<S> DeviceIdentity<S>
where
    S: KeyValueStore + Sync,
{
    pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            cached: Mutex::new(None),
        }
    }

    async fn load_or_generate(&self) -> Option<String> {
        match self.store.get(&self.key).await {
            Ok(Some(existing)) if !existing.trim().is_empty() => return Some(existing),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read device id");
                return None;
            }
        }

        let generated = platform::crypto::device_identifier();
        if let Err(e) = self.store.set(&self.key, &generated).await {
            tracing::warn!(error = %e, "Failed to persist device id");
            return None;
        }

        tracing::info!(
            device = %platform::crypto::fingerprint(&generated),
            "Generated new device id"
        );
        Some(generated)
    }
}

impl<S> IdentityProvider for DeviceIdentity<S>
where
    S: KeyValueStore + Sync,
{
    async fn get_or_create(&self) -> String {
        let mut cached = self.cached.lock().await;
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }
        match self.load_or_generate().await {
            Some(id) => {
                *cached = Some(id.clone());
                id
            }
            // Not cached: the next call retries persistence
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::storage::{MemoryStore, StoreError};

    const KEY: &str = "absense.device_id";

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[tokio::test]
    async fn test_generates_once_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let identity = DeviceIdentity::new(store.clone(), KEY);

        let first = identity.get_or_create().await;
        assert!(!first.is_empty());
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some(first.as_str()));
        assert_eq!(identity.get_or_create().await, first);
    }

    #[tokio::test]
    async fn test_reuses_existing_value() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "dev_existing").await.unwrap();

        let identity = DeviceIdentity::new(store, KEY);
        assert_eq!(identity.get_or_create().await, "dev_existing");
    }

    #[tokio::test]
    async fn test_persistence_failure_degrades_to_empty() {
        let identity = DeviceIdentity::new(Arc::new(BrokenStore), KEY);
        assert_eq!(identity.get_or_create().await, "");
        assert_eq!(identity.get_or_create().await, "");
    }
}
