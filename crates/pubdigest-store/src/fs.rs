//! Local directory store. The root directory plays the bucket; keys may
//! contain `/` and map to subdirectories.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{ListFilter, ObjectMeta, ObjectStore};

pub struct FsObjectStore {
    root: PathBuf,
    label: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self { label: format!("file://{}", root.display()), root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "Wrote object");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{}/{key}", self.label)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(objects);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else { continue };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let object = ObjectMeta {
                    key,
                    last_modified: DateTime::<Utc>::from(meta.modified()?),
                    size: meta.len(),
                };
                if filter.matches(&object) {
                    objects.push(object);
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("pubmed_sepsis_20240506.json", b"{}".to_vec(), "application/json").await.unwrap();
        store.put("2024/pubmed_sepsis_20240506_analysis.json", b"[]".to_vec(), "application/json").await.unwrap();

        assert_eq!(store.get("2024/pubmed_sepsis_20240506_analysis.json").await.unwrap(), b"[]");

        let all = store.list(&ListFilter::new()).await.unwrap();
        let keys: Vec<_> = all.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["2024/pubmed_sepsis_20240506_analysis.json", "pubmed_sepsis_20240506.json"]);

        let analysis = store.list(&ListFilter::analysis_documents()).await.unwrap();
        assert_eq!(analysis.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.put("../outside.json", vec![], "application/json").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.get("/etc/passwd").await, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing_and_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("absent"));
        assert!(store.list(&ListFilter::new()).await.unwrap().is_empty());
        assert!(matches!(store.get("a.json").await, Err(StoreError::NotFound(_))));
    }
}
