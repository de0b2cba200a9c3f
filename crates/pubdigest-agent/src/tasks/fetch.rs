//! Daily fetch: search each topic, fetch the records, store one document per topic.

use async_trait::async_trait;
use pubdigest_common::keys::{fetch_key, KeyStamp};
use pubdigest_common::models::{DateRange, FetchDocument, FetchMetadata};
use pubdigest_common::{ArticleCollection, DigestError, Result};
use pubdigest_store::write_json;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{to_body, DigestTask};
use crate::context::TaskContext;
use crate::envelope;

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub search_term: String,
    pub articles_count: usize,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTerm {
    pub search_term: String,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub message: String,
    pub results: Vec<FetchResult>,
    pub failed_terms: Vec<FailedTerm>,
}

pub struct FetchTask;

#[async_trait]
impl DigestTask for FetchTask {
    fn name(&self) -> &str { "fetch" }

    fn description(&self) -> &str {
        "Search PubMed for each configured topic over the lookback window and store the records."
    }

    fn needs_model(&self) -> bool { false }

    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value> {
        let terms = envelope::search_terms(&event).unwrap_or_else(|| ctx.settings.fetch.search_terms.clone());
        to_body(&run(ctx, &terms).await?)
    }
}

/// Topics are independent: an upstream failure for one is recorded and the
/// rest still run. A failed store write aborts the run.
pub async fn run(ctx: &TaskContext, terms: &[String]) -> Result<FetchSummary> {
    let settings = &ctx.settings.fetch;
    let now = ctx.clock.now();
    let range = DateRange::trailing_days(now.date_naive(), settings.lookback_days);
    let stamp_kind = if settings.timestamped_keys { KeyStamp::DayTime } else { KeyStamp::Day };
    let stamp = stamp_kind.render(now.naive_utc());

    let mut results = Vec::new();
    let mut failed_terms = Vec::new();

    for term in terms {
        let articles = match retrieve(ctx, term, &range).await {
            Ok(Some(articles)) => articles,
            Ok(None) => {
                info!(term = %term, "No new articles");
                continue;
            }
            Err(e) => {
                warn!(term = %term, kind = e.kind(), error = %e, "Topic failed; continuing with the rest");
                failed_terms.push(FailedTerm {
                    search_term: term.clone(),
                    error: e.kind().to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        let key = fetch_key(term, &stamp);
        let doc = FetchDocument {
            metadata: FetchMetadata {
                search_term: term.clone(),
                search_date: ctx.timestamp(),
                total_articles: articles.len(),
                date_range: Some(range),
            },
            articles,
        };
        write_json(ctx.store.as_ref(), &key, &doc).await?;
        info!(term = %term, key = %key, articles = doc.metadata.total_articles, "Stored fetch document");

        results.push(FetchResult {
            search_term: term.clone(),
            articles_count: doc.metadata.total_articles,
            file_name: key,
        });
    }

    let message = if results.is_empty() {
        "No new articles found for any search terms.".to_string()
    } else {
        format!("Successfully processed {} search terms and stored the results.", results.len())
    };
    Ok(FetchSummary { message, results, failed_terms })
}

#[instrument(skip(ctx, range), fields(source = ctx.literature.name()))]
async fn retrieve(ctx: &TaskContext, term: &str, range: &DateRange) -> Result<Option<ArticleCollection>> {
    let ids = ctx.literature.search_ids(term, range).await?;
    if ids.is_empty() {
        return Ok(None);
    }
    let articles = ctx.literature.fetch_records(&ids).await?;
    if articles.len() < ids.len() {
        warn!(requested = ids.len(), fetched = articles.len(), "Some ids returned no record");
    }
    if articles.is_empty() {
        return Err(DigestError::UpstreamRequest(format!(
            "efetch returned no records for {} ids",
            ids.len()
        )));
    }
    Ok(Some(articles))
}
