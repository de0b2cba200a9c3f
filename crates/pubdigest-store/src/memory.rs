//! In-process store with settable modification times.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{ListFilter, ObjectMeta, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self { objects: RwLock::new(BTreeMap::new()) }
    }

    /// Seed an object with an explicit modification time.
    pub async fn insert_with_mtime(&self, key: &str, body: impl Into<Vec<u8>>, mtime: DateTime<Utc>) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                content_type: crate::store::JSON_CONTENT_TYPE.to_string(),
                last_modified: mtime,
            },
        );
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StoreResult<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject { body, content_type: content_type.to_string(), last_modified: Utc::now() },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<ObjectMeta>> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .map(|(key, o)| ObjectMeta {
                key: key.clone(),
                last_modified: o.last_modified,
                size: o.body.len() as u64,
            })
            .filter(|m| filter.matches(m))
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
