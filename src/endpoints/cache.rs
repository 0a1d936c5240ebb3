// Persisted endpoint snapshot with TTL

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::tree::EndpointTree;
use crate::storage::ClientStorage;

/// Endpoint tree as last fetched, with the time it was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEndpoints {
    pub endpoints: EndpointTree,
    #[serde(default)]
    pub version: String,
    /// Server-side generation time (ISO-8601)
    #[serde(default)]
    pub timestamp: String,
    /// Unix epoch milliseconds when this snapshot was written
    pub cached_at: i64,
}

/// Thread-safe handle to the stored snapshot
pub struct EndpointCache {
    storage: Option<Arc<ClientStorage>>,
    key: String,
    ttl_ms: u64,
}

impl EndpointCache {
    pub fn new(storage: Option<Arc<ClientStorage>>, key: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            storage,
            key: key.into(),
            ttl_ms,
        }
    }

    /// Valid snapshot, if any
    ///
    /// Expired or unreadable entries are deleted and reported as absent.
    pub fn read(&self) -> Option<CachedEndpoints> {
        let storage = self.storage.as_ref()?;

        let raw = match storage.get(&self.key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Failed to read cached endpoints: {:#}", e);
                return None;
            }
        };

        let snapshot: CachedEndpoints = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Discarding corrupt endpoint cache: {}", e);
                self.clear();
                return None;
            }
        };

        let age = self.age_ms(&snapshot);
        // A snapshot from the future means the clock moved; don't trust it
        if age < 0 || age > self.ttl() {
            tracing::debug!(age_ms = age, ttl_ms = self.ttl_ms, "Endpoint cache expired");
            self.clear();
            return None;
        }

        Some(snapshot)
    }

    pub fn write(&self, endpoints: &EndpointTree, version: &str, timestamp: &str) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };

        let snapshot = CachedEndpoints {
            endpoints: endpoints.clone(),
            version: version.to_string(),
            timestamp: timestamp.to_string(),
            cached_at: Utc::now().timestamp_millis(),
        };

        let result = serde_json::to_string(&snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|json| storage.set(&self.key, &json));
        match result {
            Ok(()) => tracing::debug!(version = %version, "Endpoints cached"),
            Err(e) => tracing::warn!("Failed to cache endpoints: {:#}", e),
        }
    }

    pub fn clear(&self) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if let Err(e) = storage.remove(&self.key) {
            tracing::warn!("Failed to clear endpoint cache: {:#}", e);
        }
    }

    pub fn age_ms(&self, snapshot: &CachedEndpoints) -> i64 {
        Utc::now().timestamp_millis() - snapshot.cached_at
    }

    /// More than half of the TTL has elapsed
    pub fn is_expiring(&self, snapshot: &CachedEndpoints) -> bool {
        self.age_ms(snapshot) > self.ttl() / 2
    }

    fn ttl(&self) -> i64 {
        i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: u64 = 60_000;

    fn setup() -> (Arc<ClientStorage>, EndpointCache) {
        let storage = Arc::new(ClientStorage::in_memory().unwrap());
        let cache = EndpointCache::new(Some(storage.clone()), "api_endpoints", TTL);
        (storage, cache)
    }

    fn tree() -> EndpointTree {
        EndpointTree::new().with_url("health", "/health")
    }

    fn store_aged(storage: &ClientStorage, age_ms: i64) {
        let snapshot = CachedEndpoints {
            endpoints: tree(),
            version: "1.0.0".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            cached_at: Utc::now().timestamp_millis() - age_ms,
        };
        storage
            .set("api_endpoints", &serde_json::to_string(&snapshot).unwrap())
            .unwrap();
    }

    #[test]
    fn test_write_then_read() {
        let (_, cache) = setup();
        assert!(cache.read().is_none());

        cache.write(&tree(), "1.0.0", "2025-01-01T00:00:00Z");
        let snapshot = cache.read().unwrap();
        assert_eq!(snapshot.endpoints, tree());
        assert_eq!(snapshot.version, "1.0.0");
        assert!(!cache.is_expiring(&snapshot));
    }

    #[test]
    fn test_stored_json_is_camel_case() {
        let (storage, cache) = setup();
        cache.write(&tree(), "2", "t");

        let raw: serde_json::Value =
            serde_json::from_str(&storage.get("api_endpoints").unwrap().unwrap()).unwrap();
        assert!(raw.get("cachedAt").is_some());
        assert_eq!(raw["endpoints"]["health"], "/health");
    }

    #[test]
    fn test_expired_is_deleted() {
        let (storage, cache) = setup();
        store_aged(&storage, TTL as i64 + 1000);

        assert!(cache.read().is_none());
        assert!(storage.get("api_endpoints").unwrap().is_none());
    }

    #[test]
    fn test_future_snapshot_is_deleted() {
        let (storage, cache) = setup();
        store_aged(&storage, -5 * 60_000);

        assert!(cache.read().is_none());
        assert!(storage.get("api_endpoints").unwrap().is_none());
    }

    #[test]
    fn test_huge_ttl_does_not_wrap() {
        let storage = Arc::new(ClientStorage::in_memory().unwrap());
        let cache = EndpointCache::new(Some(storage.clone()), "api_endpoints", u64::MAX);
        store_aged(&storage, 365 * 24 * 60 * 60 * 1000);

        let snapshot = cache.read().unwrap();
        assert!(!cache.is_expiring(&snapshot));
    }

    #[test]
    fn test_corrupt_is_deleted() {
        let (storage, cache) = setup();
        storage.set("api_endpoints", "{not json").unwrap();
        assert!(cache.read().is_none());
        assert!(storage.get("api_endpoints").unwrap().is_none());

        storage
            .set("api_endpoints", r#"{"endpoints":{"a":1},"cachedAt":0}"#)
            .unwrap();
        assert!(cache.read().is_none());
        assert!(storage.get("api_endpoints").unwrap().is_none());
    }

    #[test]
    fn test_is_expiring_after_half_ttl() {
        let (storage, cache) = setup();

        store_aged(&storage, 10_000);
        let snapshot = cache.read().unwrap();
        assert!(!cache.is_expiring(&snapshot));

        store_aged(&storage, 40_000);
        let snapshot = cache.read().unwrap();
        assert!(cache.is_expiring(&snapshot));
    }

    #[test]
    fn test_without_storage() {
        let cache = EndpointCache::new(None, "api_endpoints", TTL);
        cache.write(&tree(), "1", "t");
        assert!(cache.read().is_none());
        cache.clear();
    }
}
