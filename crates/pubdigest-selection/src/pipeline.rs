//! Multi-stage model selection over token-bounded chunks.
//!
//! Chunks are sent one after another. A chunk whose call exhausts its retries
//! or whose answer cannot be parsed is skipped and recorded in the report;
//! the run carries on with the remaining chunks. Answers naming a pmid that
//! was not in the chunk they answer are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pubdigest_common::{ClinicalQuestion, EvidenceMap, Result, SelectedArticle};
use pubdigest_llm::{complete_with_retry, LlmBackend, LlmRequest, RetryPolicy};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::dedup::{merge_candidates, overlay, Identified};
use crate::parse::{candidates_from_value, extract_json, Shape};
use crate::prompts::CallSettings;

/// Renders the final-pass prompt over all merged candidates.
pub type FinalRender<'a> = &'a (dyn Fn(&[SelectedArticle]) -> String + Send + Sync);

#[derive(Clone, Copy)]
pub struct FinalStage<'a> {
    pub render: FinalRender<'a>,
    pub call: CallSettings,
}

/// When the second selection call runs.
#[derive(Clone, Copy)]
pub enum FinalPass<'a> {
    Disabled,
    /// Only when the merged candidates exceed the cap.
    WhenOverCap(FinalStage<'a>),
    /// Whenever there is at least one candidate.
    Always(FinalStage<'a>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedChunk {
    pub index: usize,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalPassStatus {
    Skipped,
    Applied { returned: usize },
    FellBack { kind: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReport {
    pub chunks_total: usize,
    pub chunks_failed: Vec<SkippedChunk>,
    /// Unique candidates after merging, before the cap.
    pub candidates: usize,
    pub final_pass: FinalPassStatus,
}

impl SelectionReport {
    fn new(chunks_total: usize) -> Self {
        Self {
            chunks_total,
            chunks_failed: Vec::new(),
            candidates: 0,
            final_pass: FinalPassStatus::Skipped,
        }
    }

    pub fn chunks_succeeded(&self) -> usize {
        self.chunks_total - self.chunks_failed.len()
    }
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub items: Vec<SelectedArticle>,
    pub report: SelectionReport,
}

#[derive(Debug, Clone)]
pub struct EvidenceOutcome {
    pub evidence: EvidenceMap,
    pub report: SelectionReport,
}

pub struct SelectionPipeline {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
    task: String,
}

impl SelectionPipeline {
    pub fn new(backend: Arc<dyn LlmBackend>, task: impl Into<String>) -> Self {
        Self { backend, retry: RetryPolicy::default(), task: task.into() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// One retried model call followed by a tolerant parse.
    pub async fn invoke_json(&self, prompt: &str, shape: Shape, call: CallSettings) -> Result<Value> {
        let req = LlmRequest::user(prompt)
            .with_max_tokens(call.max_tokens)
            .with_temperature(call.temperature);
        let response = complete_with_retry(self.backend.as_ref(), &req, &self.retry, &self.task)
            .await
            .into_result()?;
        extract_json(&response.content, shape)
    }

    pub async fn select<T, R>(
        &self,
        chunks: &[Chunk<T>],
        render: R,
        call: CallSettings,
        max_output: usize,
        final_pass: FinalPass<'_>,
    ) -> SelectionOutcome
    where
        T: Identified + Sync,
        R: Fn(&[T]) -> String + Send + Sync,
    {
        let mut report = SelectionReport::new(chunks.len());
        let mut gathered = Vec::new();

        for chunk in chunks.iter().filter(|c| !c.is_empty()) {
            let prompt = render(&chunk.items);
            match self.invoke_json(&prompt, Shape::Array, call).await {
                Ok(value) => {
                    let found = self.within_chunk(chunk, candidates_from_value(value));
                    debug!(task = %self.task, chunk = chunk.index, items = chunk.len(), selected = found.len(), "Chunk answered");
                    gathered.extend(found);
                }
                Err(e) => {
                    warn!(task = %self.task, chunk = chunk.index, kind = e.kind(), error = %e, "Skipping chunk");
                    report.chunks_failed.push(SkippedChunk { index: chunk.index, kind: e.kind().to_string() });
                }
            }
        }

        let merged = merge_candidates(gathered);
        report.candidates = merged.len();

        let stage = match final_pass {
            FinalPass::Disabled => None,
            FinalPass::WhenOverCap(stage) => (merged.len() > max_output).then_some(stage),
            FinalPass::Always(stage) => Some(stage),
        };

        let mut items = match stage {
            Some(stage) if !merged.is_empty() => self.final_select(merged, stage, max_output, &mut report).await,
            _ => merged,
        };
        items.truncate(max_output);

        info!(
            task = %self.task,
            chunks = report.chunks_total,
            failed = report.chunks_failed.len(),
            candidates = report.candidates,
            selected = items.len(),
            "Selection finished"
        );
        SelectionOutcome { items, report }
    }

    /// Keep the answers whose pmid was sent in `chunk`.
    fn within_chunk<T: Identified>(&self, chunk: &Chunk<T>, found: Vec<SelectedArticle>) -> Vec<SelectedArticle> {
        let sent: HashSet<&str> = chunk.items.iter().map(Identified::identifier).collect();
        let before = found.len();
        let kept: Vec<SelectedArticle> = found.into_iter().filter(|a| sent.contains(a.pmid.trim())).collect();
        if kept.len() < before {
            warn!(task = %self.task, chunk = chunk.index, dropped = before - kept.len(), "Answer named pmids outside the chunk");
        }
        kept
    }

    async fn final_select(
        &self,
        merged: Vec<SelectedArticle>,
        stage: FinalStage<'_>,
        max_output: usize,
        report: &mut SelectionReport,
    ) -> Vec<SelectedArticle> {
        let prompt = (stage.render)(&merged);
        let answered = match self.invoke_json(&prompt, Shape::Array, stage.call).await {
            Ok(value) => merge_candidates(candidates_from_value(value)),
            Err(e) => {
                warn!(task = %self.task, kind = e.kind(), error = %e, "Final selection failed; keeping first candidates");
                report.final_pass = FinalPassStatus::FellBack { kind: e.kind().to_string() };
                return merged;
            }
        };

        if answered.is_empty() {
            report.final_pass = FinalPassStatus::Applied { returned: 0 };
            return Vec::new();
        }

        let picked: Vec<SelectedArticle> = {
            let known: HashMap<&str, &SelectedArticle> = merged.iter().map(|a| (a.pmid.as_str(), a)).collect();
            answered
                .into_iter()
                .filter_map(|a| match known.get(a.pmid.as_str()) {
                    Some(base) => Some(overlay(base, a)),
                    None => {
                        debug!(task = %self.task, pmid = %a.pmid, "Final selection named an unknown pmid");
                        None
                    }
                })
                .take(max_output)
                .collect()
        };

        if picked.is_empty() {
            warn!(task = %self.task, "Final selection returned no known pmids; keeping first candidates");
            report.final_pass = FinalPassStatus::FellBack { kind: "ResponseParseError".to_string() };
            return merged;
        }
        report.final_pass = FinalPassStatus::Applied { returned: picked.len() };
        picked
    }

    /// Per-chunk evidence extraction. Every question keeps its own list,
    /// merged and capped independently; ids outside `questions` are ignored.
    pub async fn extract_evidence<T, R>(
        &self,
        chunks: &[Chunk<T>],
        render: R,
        questions: &[ClinicalQuestion],
        call: CallSettings,
        max_per_question: usize,
    ) -> EvidenceOutcome
    where
        T: Identified + Sync,
        R: Fn(&[T]) -> String + Send + Sync,
    {
        let mut report = SelectionReport::new(chunks.len());
        let mut gathered: Vec<Vec<SelectedArticle>> = vec![Vec::new(); questions.len()];

        for chunk in chunks.iter().filter(|c| !c.is_empty()) {
            let prompt = render(&chunk.items);
            let value = match self.invoke_json(&prompt, Shape::Object, call).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(task = %self.task, chunk = chunk.index, kind = e.kind(), error = %e, "Skipping chunk");
                    report.chunks_failed.push(SkippedChunk { index: chunk.index, kind: e.kind().to_string() });
                    continue;
                }
            };
            let Value::Object(mut answer) = value else { continue };
            for (slot, question) in gathered.iter_mut().zip(questions) {
                if let Some(list) = answer.remove(&question.id) {
                    slot.extend(self.within_chunk(chunk, candidates_from_value(list)));
                }
            }
            if !answer.is_empty() {
                debug!(task = %self.task, chunk = chunk.index, ignored = answer.len(), "Dropped unknown question ids");
            }
        }

        let mut evidence = EvidenceMap::with_questions(questions.iter().map(|q| q.id.as_str()));
        for (question, items) in questions.iter().zip(gathered) {
            let mut merged = merge_candidates(items);
            report.candidates += merged.len();
            merged.truncate(max_per_question);
            if let Some(list) = evidence.get_mut(&question.id) {
                *list = merged;
            }
        }

        info!(
            task = %self.task,
            chunks = report.chunks_total,
            failed = report.chunks_failed.len(),
            entries = evidence.total_entries(),
            "Evidence extraction finished"
        );
        EvidenceOutcome { evidence, report }
    }
}
