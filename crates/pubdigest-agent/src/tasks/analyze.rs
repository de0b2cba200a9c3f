//! Impact selection over one fetch document.

use async_trait::async_trait;
use pubdigest_common::keys::{analysis_key, DocKind};
use pubdigest_common::models::{AnalysisDocument, AnalysisMetadata, FetchDocument};
use pubdigest_common::{ArticleRecord, DigestError, Result, SelectedArticle};
use pubdigest_selection::prompts::{self, render_article};
use pubdigest_selection::{plan_chunks, CallSettings, FinalPass, FinalStage, SelectionPipeline};
use pubdigest_store::{read_json, write_json};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{to_body, DigestTask};
use crate::context::TaskContext;
use crate::envelope::{self, ObjectRef};

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeSummary {
    pub bucket: String,
    pub input_key: String,
    /// `None` when nothing was selected and no document was written.
    pub output_key: Option<String>,
    pub articles_analyzed: usize,
    pub articles_selected: usize,
    pub chunks_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct AnalyzeTask;

#[async_trait]
impl DigestTask for AnalyzeTask {
    fn name(&self) -> &str { "analyze" }

    fn description(&self) -> &str {
        "Select the most clinically impactful articles of one fetch document."
    }

    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value> {
        let target = envelope::object_ref(&event, &["key"])?;
        to_body(&run(ctx, &target).await?)
    }
}

pub async fn run(ctx: &TaskContext, target: &ObjectRef) -> Result<AnalyzeSummary> {
    target.check_bucket(ctx.bucket())?;
    let key = target.key.as_str();
    if DocKind::classify(key) != DocKind::Fetch {
        return Err(DigestError::InvalidInput(format!("'{key}' is not a fetch document")));
    }
    let pipeline = ctx.pipeline("analyze")?;
    info!(bucket = ctx.bucket(), key, "Analyzing fetch document");

    let raw: Value = read_json(ctx.store.as_ref(), key).await?;
    if !raw["articles"].is_object() {
        return Err(DigestError::InvalidInput(format!("'{key}' has no 'articles' field")));
    }
    let fetched: FetchDocument = serde_json::from_value(raw)?;
    let articles: Vec<ArticleRecord> = fetched.articles.iter().cloned().collect();
    let analyzed = articles.len();

    let (items, chunks_failed) = select_impactful(ctx, &pipeline, articles).await;

    let mut summary = AnalyzeSummary {
        bucket: ctx.bucket().to_string(),
        input_key: key.to_string(),
        output_key: None,
        articles_analyzed: analyzed,
        articles_selected: items.len(),
        chunks_failed,
        message: None,
    };

    if items.is_empty() {
        info!(key, "No impactful articles selected; nothing written");
        summary.message = Some("No impactful articles selected".to_string());
        return Ok(summary);
    }

    let search_term = match fetched.metadata.search_term.as_str() {
        "" => "unknown".to_string(),
        term => term.to_string(),
    };
    let doc = AnalysisDocument {
        metadata: AnalysisMetadata {
            original_file: format!("s3://{}/{key}", ctx.bucket()),
            analysis_date: ctx.timestamp(),
            search_term,
            total_analyzed: analyzed,
            total_selected: items.len(),
        },
        impactful_articles: items,
    };
    let output_key = analysis_key(key);
    write_json(ctx.store.as_ref(), &output_key, &doc).await?;
    info!(key = %output_key, selected = doc.metadata.total_selected, "Stored analysis document");

    summary.output_key = Some(output_key);
    Ok(summary)
}

/// Chunk, select per chunk, and cut down with a final pass only when the
/// merged answers exceed the cap.
async fn select_impactful(
    ctx: &TaskContext,
    pipeline: &SelectionPipeline,
    articles: Vec<ArticleRecord>,
) -> (Vec<SelectedArticle>, usize) {
    let settings = &ctx.settings;
    let max = settings.analyze.max_selected;
    let (budget, chunks) = plan_chunks(
        articles,
        &ctx.estimator,
        settings.chunking.max_tokens,
        &prompts::impact_selection(&[], max),
        render_article,
    );
    info!(chunks = chunks.len(), base_overhead = budget.base_overhead, "Planned chunks");
    if chunks.is_empty() {
        return (Vec::new(), 0);
    }

    let call = CallSettings { max_tokens: settings.llm.impact_max_tokens, temperature: settings.llm.impact_temperature };
    let final_call = CallSettings {
        max_tokens: settings.llm.impact_final_max_tokens,
        temperature: settings.llm.rollup_temperature,
    };
    let final_render = |c: &[SelectedArticle]| prompts::impact_final_selection(c, max);

    let outcome = pipeline
        .select(
            &chunks,
            |items: &[ArticleRecord]| prompts::impact_selection(items, max),
            call,
            max,
            FinalPass::WhenOverCap(FinalStage { render: &final_render, call: final_call }),
        )
        .await;
    (outcome.items, outcome.report.chunks_failed.len())
}
