//! Pluggable TTL cache for single-node result memoization.
//!
//! The engine consults a `CacheStore` before invoking an executor and
//! stores successful results afterwards. Entries older than their TTL are
//! treated as absent. Implementations used concurrently must be internally
//! thread-safe; the in-memory reference implementation is.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use flowtide_types::node::NodeExecutionResult;

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Keyed store for memoized node results.
///
/// Async so that implementations backed by external stores (Redis, disk)
/// can slot in without changing the engine.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch an entry; expired entries must read as absent.
    async fn get(&self, key: &str) -> Option<NodeExecutionResult>;

    /// Store an entry with the given time-to-live.
    async fn set(&self, key: &str, result: NodeExecutionResult, ttl: Duration);

    /// Remove an entry if present.
    async fn delete(&self, key: &str);
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

struct CacheEntry {
    result: NodeExecutionResult,
    expires_at: Instant,
}

/// In-memory `CacheStore` backed by a concurrent map.
///
/// Expired entries are evicted lazily on read; there is no background
/// sweep.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired, not-yet-evicted) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<NodeExecutionResult> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.expires_at <= Instant::now() => true,
            Some(entry) => return Some(entry.result.clone()),
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, result: NodeExecutionResult, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                result,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(tag: &str) -> NodeExecutionResult {
        NodeExecutionResult::success(json!({ "tag": tag }))
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryCacheStore::new();
        store.set("k", result("a"), Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await, Some(result("a")));
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let store = MemoryCacheStore::new();
        assert_eq!(store.get("nope").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_absent_and_is_evicted() {
        let store = MemoryCacheStore::new();
        store.set("k", result("a"), Duration::from_millis(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("k").await, None);
        assert!(store.is_empty(), "expired entry should be evicted on read");
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let store = MemoryCacheStore::new();
        store.set("k", result("a"), Duration::from_secs(60)).await;
        store.delete("k").await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_value_and_ttl() {
        let store = MemoryCacheStore::new();
        store.set("k", result("a"), Duration::from_secs(60)).await;
        store.set("k", result("b"), Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await, Some(result("b")));
        assert_eq!(store.len(), 1);
    }
}
