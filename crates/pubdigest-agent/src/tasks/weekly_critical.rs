//! Weekly highlights: the two or three most important articles of the window.

use std::collections::HashMap;

use async_trait::async_trait;
use pubdigest_common::keys::{weekly_key, KeyStamp, WeeklyDoc};
use pubdigest_common::models::{WeeklyCriticalDocument, WeeklyCriticalMetadata, WeeklyHighlights};
use pubdigest_common::{Result, SelectedArticle};
use pubdigest_selection::prompts::{self, render_candidate};
use pubdigest_selection::dedup::overlay;
use pubdigest_selection::{plan_chunks, CallSettings, FinalPass, FinalStage, SelectionPipeline};
use pubdigest_store::write_json;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::rollup::gather_recent;
use super::{to_body, DigestTask};
use crate::context::TaskContext;
use crate::envelope;

const REPORT_TYPE: &str = "weekly_critical_articles";
const SELECTION_CRITERIA: &str = "top_2_3_most_impactful";
const RATIONALE_JA: &str = "臨床実践への即時影響度、科学的ブレークスルー、研究の質を基準に選定";
const RATIONALE_EN: &str =
    "Selected for immediate impact on clinical practice, scientific breakthrough and study quality";

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyCriticalSummary {
    pub message: String,
    pub search_term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    pub articles_selected: usize,
}

pub struct WeeklyCriticalTask;

#[async_trait]
impl DigestTask for WeeklyCriticalTask {
    fn name(&self) -> &str { "weekly-critical" }

    fn description(&self) -> &str {
        "Pick the most important articles of the past week from the stored analyses."
    }

    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value> {
        let term = envelope::search_term(&event);
        to_body(&run(ctx, term.as_deref()).await?)
    }
}

pub async fn run(ctx: &TaskContext, term: Option<&str>) -> Result<WeeklyCriticalSummary> {
    let settings = &ctx.settings.weekly;
    let label = term.unwrap_or("all").to_string();
    let empty = |message: &str| WeeklyCriticalSummary {
        message: message.to_string(),
        search_term: label.clone(),
        output_file: None,
        articles_selected: 0,
    };

    let pipeline = ctx.pipeline("weekly-critical")?;
    let gathered = gather_recent(ctx, settings.window_days, term, true).await?;
    if gathered.files.is_empty() {
        return Ok(empty("No files to process"));
    }
    if gathered.articles.is_empty() {
        return Ok(empty("No articles found"));
    }
    let reviewed = gathered.articles.len();

    let selected = select_weekly(ctx, &pipeline, gathered.articles).await;
    if selected.is_empty() {
        info!("No article made the weekly cut; nothing written");
        return Ok(empty("No important articles selected"));
    }

    let (summary, selection_rationale) = highlight_text(&settings.report_language, reviewed, selected.len());
    let today = ctx.today();
    let doc = WeeklyCriticalDocument {
        metadata: WeeklyCriticalMetadata {
            generated_date: ctx.timestamp(),
            period_start: today - chrono::Duration::days(i64::from(settings.window_days)),
            period_end: today,
            search_term: label.clone(),
            files_analyzed: gathered.files.len(),
            total_articles_reviewed: reviewed,
            articles_selected: selected.len(),
            report_type: REPORT_TYPE.to_string(),
            selection_criteria: SELECTION_CRITERIA.to_string(),
        },
        weekly_highlights: WeeklyHighlights {
            summary,
            selection_rationale,
            top_journals: top_journals(&selected),
        },
        critical_articles: selected,
    };

    let stamp = KeyStamp::Day.render(ctx.clock.now().naive_utc());
    let output_key = weekly_key(WeeklyDoc::Critical, term, &stamp);
    write_json(ctx.store.as_ref(), &output_key, &doc).await?;
    info!(key = %output_key, selected = doc.metadata.articles_selected, "Stored weekly highlights");

    Ok(WeeklyCriticalSummary {
        message: "Weekly critical articles analysis completed successfully".to_string(),
        search_term: label,
        output_file: Some(output_key),
        articles_selected: doc.metadata.articles_selected,
    })
}

async fn select_weekly(
    ctx: &TaskContext,
    pipeline: &SelectionPipeline,
    candidates: Vec<SelectedArticle>,
) -> Vec<SelectedArticle> {
    let settings = &ctx.settings;
    let max = settings.weekly.max_selected;
    let language = settings.weekly.report_language.as_str();

    let gathered: HashMap<String, SelectedArticle> =
        candidates.iter().map(|a| (a.pmid.clone(), a.clone())).collect();
    let (_, chunks) = plan_chunks(
        candidates,
        &ctx.estimator,
        settings.chunking.max_tokens,
        &prompts::weekly_importance(&[], max, language),
        render_candidate,
    );
    let call = CallSettings { max_tokens: settings.llm.weekly_max_tokens, temperature: settings.llm.rollup_temperature };
    let final_call = CallSettings {
        max_tokens: settings.llm.weekly_final_max_tokens,
        temperature: settings.llm.rollup_temperature,
    };
    let final_render = |c: &[SelectedArticle]| prompts::weekly_final_selection(c, max, language);

    let outcome = pipeline
        .select(
            &chunks,
            |items: &[SelectedArticle]| prompts::weekly_importance(items, max, language),
            call,
            max,
            FinalPass::Always(FinalStage { render: &final_render, call: final_call }),
        )
        .await;
    restore_context(&gathered, outcome.items)
}

/// Put the gathered fields (journal, source file) back under the model's
/// answer. Answers naming an article that was never gathered are dropped.
fn restore_context(gathered: &HashMap<String, SelectedArticle>, items: Vec<SelectedArticle>) -> Vec<SelectedArticle> {
    items
        .into_iter()
        .filter_map(|item| match gathered.get(&item.pmid) {
            Some(base) => Some(overlay(base, item)),
            None => {
                debug!(pmid = %item.pmid, "Weekly answer named an article outside the window");
                None
            }
        })
        .collect()
}

/// Summary sentence and rationale in the report language. Japanese is
/// recognised by name or code; every other language gets English.
fn highlight_text(language: &str, reviewed: usize, selected: usize) -> (String, String) {
    match language.trim().to_ascii_lowercase().as_str() {
        "japanese" | "ja" | "日本語" => (
            format!("今週は{reviewed}件の論文から最も重要な{selected}件を厳選しました。"),
            RATIONALE_JA.to_string(),
        ),
        _ => (
            format!("This week the {selected} most important of {reviewed} reviewed articles were selected."),
            RATIONALE_EN.to_string(),
        ),
    }
}

/// Distinct non-empty journal names, first-seen order.
fn top_journals(items: &[SelectedArticle]) -> Vec<String> {
    let mut journals: Vec<String> = Vec::new();
    for journal in items.iter().filter_map(|a| a.field_str("journal")).map(str::trim) {
        if !journal.is_empty() && !journals.iter().any(|j| j == journal) {
            journals.push(journal.to_string());
        }
    }
    journals
}
