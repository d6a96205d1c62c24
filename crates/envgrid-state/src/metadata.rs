//! MetadataStore — bounded in-memory cache of deployment metadata.
//!
//! New ids beyond capacity are rejected rather than evicting older entries;
//! the expiry path is what frees slots.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Capacity-bounded `id -> metadata` map.
pub struct MetadataStore {
    capacity: usize,
    entries: RwLock<HashMap<String, Value>>,
}

impl MetadataStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store `metadata` for `id`.
    ///
    /// Returns `false` without storing when the id is empty, the value is
    /// not a JSON object, or the store is full and `id` is not already
    /// present.
    pub async fn set(&self, id: &str, metadata: Value) -> bool {
        if id.is_empty() || !metadata.is_object() {
            return false;
        }
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity && !entries.contains_key(id) {
            warn!(deployment_id = %id, capacity = self.capacity, "metadata store full, entry rejected");
            return false;
        }
        entries.insert(id.to_string(), metadata);
        true
    }

    pub async fn get(&self, id: &str) -> Option<Value> {
        self.entries.read().await.get(id).cloned()
    }

    /// Remove `id`. Returns whether it was present.
    pub async fn delete(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Drop every entry whose id is not in `active_ids`.
    pub async fn prune_inactive(&self, active_ids: &[String]) -> usize {
        let active: HashSet<&str> = active_ids.iter().map(String::as_str).collect();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|id, _| active.contains(id.as_str()));
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, remaining = entries.len(), "pruned inactive metadata");
        }
        pruned
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of every entry.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn set_and_get() {
        let store = MetadataStore::new(2);
        assert!(store.set("abc", json!({"owner": "ci"})).await);
        assert_eq!(store.get("abc").await, Some(json!({"owner": "ci"})));
        assert_eq!(store.get("missing").await, None);
    }

    #[tokio::test]
    async fn rejects_invalid_entries() {
        let store = MetadataStore::new(2);
        assert!(!store.set("", json!({"a": 1})).await);
        assert!(!store.set("abc", json!("not a map")).await);
        assert!(!store.set("abc", json!([1, 2])).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn capacity_rejects_new_ids_but_allows_replacement() {
        let store = MetadataStore::new(2);
        assert!(store.set("a", json!({"v": 1})).await);
        assert!(store.set("b", json!({"v": 1})).await);
        assert!(!store.set("c", json!({"v": 1})).await);
        assert_eq!(store.len().await, 2);

        assert!(store.set("a", json!({"v": 2})).await);
        assert_eq!(store.get("a").await, Some(json!({"v": 2})));
        assert_eq!(store.get("c").await, None);
    }

    #[tokio::test]
    async fn delete_frees_a_slot() {
        let store = MetadataStore::new(1);
        assert!(store.set("a", json!({})).await);
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
        assert!(store.set("b", json!({})).await);
    }

    #[tokio::test]
    async fn prune_inactive_is_exact() {
        let store = MetadataStore::new(10);
        for id in ["a", "b", "c", "d"] {
            store.set(id, json!({})).await;
        }
        let pruned = store
            .prune_inactive(&["b".to_string(), "d".to_string(), "zzz".to_string()])
            .await;
        assert_eq!(pruned, 2);
        let mut ids: Vec<String> = store.snapshot().await.into_keys().collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[tokio::test]
    async fn concurrent_sets_never_exceed_capacity() {
        let store = Arc::new(MetadataStore::new(5));
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(&format!("id-{i}"), json!({"i": i})).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(store.len().await, 5);
    }
}
