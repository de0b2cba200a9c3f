//! The [`ObjectStore`] trait, listing filters and JSON helpers.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pubdigest_common::keys::{ANALYSIS_SUFFIX, TRANSLATION_SUFFIX};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Client-side listing filter. `prefix` is also pushed down to backends that
/// support it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub exclude_suffixes: Vec<String>,
    /// Keep objects last modified on or after this UTC calendar date.
    pub modified_since: Option<NaiveDate>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Impact-selection outputs only: `*_analysis.json` minus translations.
    pub fn analysis_documents() -> Self {
        Self::new().with_suffix(ANALYSIS_SUFFIX).excluding_suffix(TRANSLATION_SUFFIX)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn excluding_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.exclude_suffixes.push(suffix.into());
        self
    }

    pub fn modified_since(mut self, date: NaiveDate) -> Self {
        self.modified_since = Some(date);
        self
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        if let Some(prefix) = &self.prefix {
            if !meta.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(suffix) = &self.suffix {
            if !meta.key.ends_with(suffix.as_str()) {
                return false;
            }
        }
        if self.exclude_suffixes.iter().any(|s| meta.key.ends_with(s.as_str())) {
            return false;
        }
        match self.modified_since {
            Some(floor) => meta.last_modified.date_naive() >= floor,
            None => true,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Objects matching `filter`, sorted by key.
    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<ObjectMeta>>;

    /// Human-readable location, e.g. `s3://bucket`.
    fn name(&self) -> &str;
}

/// Serialise `value` with 2-space indentation (non-ASCII kept literal) and
/// store it under `key`.
pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|source| StoreError::Json { key: key.to_string(), source })?;
    debug!(store = store.name(), key, bytes = body.len(), "Writing JSON document");
    store.put(key, body, JSON_CONTENT_TYPE).await
}

pub async fn read_json<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> StoreResult<T> {
    let bytes = store.get(key).await?;
    let text = String::from_utf8(bytes).map_err(|_| StoreError::Encoding { key: key.to_string() })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Json { key: key.to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(key: &str, y: i32, m: u32, d: u32, h: u32) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            last_modified: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
            size: 10,
        }
    }

    #[test]
    fn test_analysis_filter_excludes_translations_and_weekly() {
        let f = ListFilter::analysis_documents();
        assert!(f.matches(&meta("pubmed_sepsis_20240506_analysis.json", 2024, 5, 6, 1)));
        assert!(!f.matches(&meta("pubmed_sepsis_20240506_jp_analysis.json", 2024, 5, 6, 1)));
        assert!(!f.matches(&meta("pubmed_sepsis_20240506.json", 2024, 5, 6, 1)));
        assert!(!f.matches(&meta("weekly_analysis_20240506.json", 2024, 5, 6, 1)));
    }

    #[test]
    fn test_modified_since_compares_calendar_dates() {
        let floor = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let f = ListFilter::new().modified_since(floor);
        // any time on the floor date counts
        assert!(f.matches(&meta("a.json", 2024, 5, 1, 0)));
        assert!(f.matches(&meta("a.json", 2024, 5, 1, 23)));
        assert!(!f.matches(&meta("a.json", 2024, 4, 30, 23)));
    }

    #[test]
    fn test_prefix_filter() {
        let f = ListFilter::new().with_prefix("pubmed_");
        assert!(f.matches(&meta("pubmed_x.json", 2024, 1, 1, 0)));
        assert!(!f.matches(&meta("weekly_x.json", 2024, 1, 1, 0)));
    }
}
