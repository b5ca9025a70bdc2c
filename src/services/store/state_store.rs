use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

/// Remote document store boundary (MongoDB or compatible). Implementations
/// are supplied by the hosting process; this crate only depends on the
/// interface.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    /// Returns false when the write could not be persisted.
    async fn set(&self, key: &str, value: Value) -> bool;
    async fn find_one(&self, filter: &Value) -> Option<Value>;
}

/// Keyed state store with a remote backend when available and an on-disk JSON
/// fallback otherwise. Updates through the fallback are persisted on change.
#[derive(Clone)]
pub struct StateStore {
    remote: Option<Arc<dyn DocumentStore>>,
    fallback_path: PathBuf,
    fallback: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl StateStore {
    pub fn new(remote: Option<Arc<dyn DocumentStore>>, fallback_path: impl Into<PathBuf>) -> Self {
        let fallback_path = fallback_path.into();
        let fallback = Self::load_fallback(&fallback_path);
        Self { remote, fallback_path, fallback: Arc::new(Mutex::new(fallback)) }
    }

    /// Local-only store rooted at the given file.
    pub fn local(fallback_path: impl Into<PathBuf>) -> Self {
        Self::new(None, fallback_path)
    }

    /// Whether a remote document store backs this handle.
    pub fn enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(remote) = &self.remote {
            if let Some(value) = remote.get(key).await {
                return Some(value);
            }
            return None;
        }
        self.fallback.lock().expect("state store poisoned").get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: Value) -> bool {
        if let Some(remote) = &self.remote {
            return remote.set(key, value).await;
        }
        {
            let mut map = self.fallback.lock().expect("state store poisoned");
            map.insert(key.to_string(), value);
        }
        self.persist_fallback()
    }

    pub async fn find_one(&self, filter: &Value) -> Option<Value> {
        if let Some(remote) = &self.remote {
            return remote.find_one(filter).await;
        }
        // Fallback semantics: filter is {"_id": key}-shaped.
        let key = filter.get("_id").and_then(Value::as_str)?;
        self.fallback.lock().expect("state store poisoned").get(key).cloned()
    }

    fn load_fallback(path: &Path) -> BTreeMap<String, Value> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str::<BTreeMap<String, Value>>(&raw) {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!("State store file {} is corrupt: {}", path.display(), err);
                BTreeMap::new()
            },
        }
    }

    fn persist_fallback(&self) -> bool {
        let snapshot = {
            let map = self.fallback.lock().expect("state store poisoned");
            serde_json::to_string(&*map)
        };
        let Ok(payload) = snapshot else {
            return false;
        };
        if let Some(parent) = self.fallback_path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("State store mkdir failed: {}", err);
                return false;
            }
        }
        match std::fs::write(&self.fallback_path, payload) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    "State store persist to {} failed: {}",
                    self.fallback_path.display(),
                    err
                );
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn local_store_round_trips_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::local(&path);
        assert!(!store.enabled());
        assert!(store.set("table_scope", json!({"selected_ids": ["patients"]})).await);
        assert_eq!(
            store.get("table_scope").await.unwrap()["selected_ids"][0],
            json!("patients")
        );

        // A fresh handle over the same file sees the persisted value.
        let reopened = StateStore::local(&path);
        assert!(reopened.get("table_scope").await.is_some());
    }

    #[tokio::test]
    async fn find_one_matches_on_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::local(dir.path().join("state.json"));
        store.set("cohort::saved", json!({"cohorts": []})).await;
        assert!(store.find_one(&json!({"_id": "cohort::saved"})).await.is_some());
        assert!(store.find_one(&json!({"_id": "missing"})).await.is_none());
    }
}
