//! Literature source clients.

pub mod pubmed;

use std::sync::Mutex;

use async_trait::async_trait;
use pubdigest_common::models::DateRange;
use pubdigest_common::{ArticleCollection, ArticleRecord, DigestError, Result};

/// Common interface for literature sources.
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    /// Identifiers of articles matching `term` whose entry date falls in `range`.
    async fn search_ids(&self, term: &str, range: &DateRange) -> Result<Vec<String>>;

    /// Full records for `pmids`. Ids the source cannot resolve are absent
    /// from the result, not errors.
    async fn fetch_records(&self, pmids: &[String]) -> Result<ArticleCollection>;

    fn name(&self) -> &str;
}

/// Serves a fixed set of records for every search; terms listed with
/// [`StaticSource::failing_term`] fail with an upstream error instead.
#[derive(Default)]
pub struct StaticSource {
    records: Vec<ArticleRecord>,
    failing_terms: Vec<String>,
    searches: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn new(records: impl IntoIterator<Item = ArticleRecord>) -> Self {
        Self { records: records.into_iter().collect(), ..Default::default() }
    }

    pub fn failing_term(mut self, term: impl Into<String>) -> Self {
        self.failing_terms.push(term.into());
        self
    }

    /// Terms searched so far, in call order.
    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LiteratureSource for StaticSource {
    async fn search_ids(&self, term: &str, _range: &DateRange) -> Result<Vec<String>> {
        if let Ok(mut s) = self.searches.lock() {
            s.push(term.to_string());
        }
        if self.failing_terms.iter().any(|t| t == term) {
            return Err(DigestError::UpstreamRequest(format!("esearch failed for '{term}'")));
        }
        Ok(self.records.iter().map(|r| r.pmid.clone()).collect())
    }

    async fn fetch_records(&self, pmids: &[String]) -> Result<ArticleCollection> {
        Ok(self
            .records
            .iter()
            .filter(|r| pmids.contains(&r.pmid))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}
