//! The daily chain: fetch, then analyze and translate each stored document.
//!
//! Storage notifications normally drive analyze and translate one object at a
//! time; this task runs the same steps in-process for deployments without
//! an event bus.

use async_trait::async_trait;
use pubdigest_common::{DigestError, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::{analyze, fetch, to_body, translate, DigestTask};
use crate::context::TaskContext;
use crate::envelope::{self, ObjectRef};

#[derive(Debug, Clone, Serialize)]
pub struct StepError {
    pub step: &'static str,
    pub kind: String,
    pub message: String,
}

impl StepError {
    fn new(step: &'static str, e: &DigestError) -> Self {
        Self { step, kind: e.kind().to_string(), message: e.to_string() }
    }
}

/// What happened to one fetch document.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStep {
    pub fetch_key: String,
    pub analysis_key: Option<String>,
    pub translation_key: Option<String>,
    pub articles_selected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub message: String,
    pub fetch: fetch::FetchSummary,
    pub steps: Vec<ChainStep>,
}

pub struct DailyTask;

#[async_trait]
impl DigestTask for DailyTask {
    fn name(&self) -> &str { "daily" }

    fn description(&self) -> &str {
        "Fetch every topic, then analyze and translate each new document."
    }

    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value> {
        let terms = envelope::search_terms(&event).unwrap_or_else(|| ctx.settings.fetch.search_terms.clone());
        to_body(&run(ctx, &terms).await?)
    }
}

/// A failure on one document is recorded on its step and the chain moves on.
pub async fn run(ctx: &TaskContext, terms: &[String]) -> Result<DailySummary> {
    let fetched = fetch::run(ctx, terms).await?;

    let mut steps = Vec::with_capacity(fetched.results.len());
    for result in &fetched.results {
        steps.push(process(ctx, &result.file_name).await);
    }

    let failed = steps.iter().filter(|s| s.error.is_some()).count();
    let message = format!(
        "Processed {} fetch documents ({} failed, {} topics failed to fetch).",
        steps.len(),
        failed,
        fetched.failed_terms.len()
    );
    Ok(DailySummary { message, fetch: fetched, steps })
}

async fn process(ctx: &TaskContext, fetch_key: &str) -> ChainStep {
    let mut step = ChainStep {
        fetch_key: fetch_key.to_string(),
        analysis_key: None,
        translation_key: None,
        articles_selected: 0,
        error: None,
    };

    let analyzed = match analyze::run(ctx, &ObjectRef::new(fetch_key)).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(key = fetch_key, kind = e.kind(), error = %e, "Analyze step failed");
            step.error = Some(StepError::new("analyze", &e));
            return step;
        }
    };
    step.articles_selected = analyzed.articles_selected;
    let Some(analysis_key) = analyzed.output_key else { return step };
    step.analysis_key = Some(analysis_key.clone());

    match translate::run(ctx, &ObjectRef::new(analysis_key.as_str())).await {
        Ok(summary) => step.translation_key = Some(summary.output_key),
        Err(e) => {
            warn!(key = %analysis_key, kind = e.kind(), error = %e, "Translate step failed");
            step.error = Some(StepError::new("translate", &e));
        }
    }
    step
}
