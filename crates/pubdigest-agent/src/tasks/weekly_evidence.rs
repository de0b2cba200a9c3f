//! Weekly evidence rollup: map recent selections onto the clinical questions.

use async_trait::async_trait;
use pubdigest_common::keys::{weekly_key, KeyStamp, WeeklyDoc};
use pubdigest_common::models::{WeeklyEvidenceDocument, WeeklyEvidenceMetadata};
use pubdigest_common::{EvidenceMap, Result, SelectedArticle};
use pubdigest_selection::prompts::{self, render_candidate};
use pubdigest_selection::{plan_chunks, CallSettings, SelectionPipeline};
use pubdigest_store::write_json;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::rollup::gather_recent;
use super::{to_body, DigestTask};
use crate::context::TaskContext;
use crate::envelope;

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyEvidenceSummary {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    pub articles_analyzed: usize,
    pub evidence_entries: usize,
}

pub struct WeeklyEvidenceTask;

#[async_trait]
impl DigestTask for WeeklyEvidenceTask {
    fn name(&self) -> &str { "weekly-evidence" }

    fn description(&self) -> &str {
        "Extract evidence for each clinical question from the past week's analyses."
    }

    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value> {
        let term = envelope::search_term(&event);
        to_body(&run(ctx, term.as_deref()).await?)
    }
}

pub async fn run(ctx: &TaskContext, term: Option<&str>) -> Result<WeeklyEvidenceSummary> {
    let settings = &ctx.settings.evidence;
    let pipeline = ctx.pipeline("weekly-evidence")?;
    let gathered = gather_recent(ctx, settings.window_days, term, false).await?;
    let analyzed = gathered.articles.len();

    let evidence = if gathered.articles.is_empty() {
        EvidenceMap::with_questions(settings.questions.iter().map(|q| q.id.as_str()))
    } else {
        extract(ctx, &pipeline, gathered.articles).await
    };

    if !evidence.has_evidence() {
        info!(articles = analyzed, "No evidence found; nothing written");
        return Ok(WeeklyEvidenceSummary {
            message: "No evidence articles found".to_string(),
            output_file: None,
            articles_analyzed: analyzed,
            evidence_entries: 0,
        });
    }

    let today = ctx.today();
    let doc = WeeklyEvidenceDocument {
        metadata: WeeklyEvidenceMetadata {
            generated_date: ctx.timestamp(),
            period_start: today - chrono::Duration::days(i64::from(settings.window_days)),
            period_end: today,
            search_term: term.unwrap_or("all").to_string(),
            files_analyzed: gathered.files.len(),
            articles_analyzed: analyzed,
        },
        evidence_articles: evidence,
    };

    let stamp = KeyStamp::Day.render(ctx.clock.now().naive_utc());
    let output_key = weekly_key(WeeklyDoc::Evidence, term, &stamp);
    write_json(ctx.store.as_ref(), &output_key, &doc).await?;
    let entries = doc.evidence_articles.total_entries();
    info!(key = %output_key, entries, "Stored weekly evidence");

    Ok(WeeklyEvidenceSummary {
        message: "Weekly evidence extraction completed successfully".to_string(),
        output_file: Some(output_key),
        articles_analyzed: analyzed,
        evidence_entries: entries,
    })
}

async fn extract(ctx: &TaskContext, pipeline: &SelectionPipeline, candidates: Vec<SelectedArticle>) -> EvidenceMap {
    let settings = &ctx.settings;
    let questions = settings.evidence.questions.as_slice();
    let language = settings.evidence.report_language.as_str();

    let (_, chunks) = plan_chunks(
        candidates,
        &ctx.estimator,
        settings.chunking.max_tokens,
        &prompts::evidence_extraction(&[], questions, language),
        render_candidate,
    );
    let call = CallSettings { max_tokens: settings.llm.evidence_max_tokens, temperature: settings.llm.rollup_temperature };

    let outcome = pipeline
        .extract_evidence(
            &chunks,
            |items: &[SelectedArticle]| prompts::evidence_extraction(items, questions, language),
            questions,
            call,
            settings.evidence.max_per_question,
        )
        .await;
    outcome.evidence
}
