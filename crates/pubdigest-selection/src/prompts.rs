//! Prompt templates.
//!
//! Every template is a pure function of its inputs, asks for exactly one
//! JSON value, and says in so many words that an empty answer is fine.
//! Rendering a template with no items gives the base overhead used for
//! chunk budgets.

use pubdigest_common::{ArticleRecord, ClinicalQuestion, SelectedArticle};
use serde_json::Value;

use crate::parse::Shape;

/// Output budget and sampling for one model call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    ImpactSelection,
    ImpactFinalSelection,
    WeeklyImportance,
    WeeklyFinalSelection,
    EvidenceExtraction,
    Translation,
}

impl PromptVariant {
    pub fn label(&self) -> &'static str {
        match self {
            PromptVariant::ImpactSelection => "impact_selection",
            PromptVariant::ImpactFinalSelection => "impact_final_selection",
            PromptVariant::WeeklyImportance => "weekly_importance",
            PromptVariant::WeeklyFinalSelection => "weekly_final_selection",
            PromptVariant::EvidenceExtraction => "evidence_extraction",
            PromptVariant::Translation => "translation",
        }
    }

    pub fn response_shape(&self) -> Shape {
        match self {
            PromptVariant::EvidenceExtraction | PromptVariant::Translation => Shape::Object,
            _ => Shape::Array,
        }
    }

    pub fn max_output_tokens(&self) -> u32 {
        match self {
            PromptVariant::ImpactSelection | PromptVariant::ImpactFinalSelection => 1000,
            PromptVariant::WeeklyFinalSelection => 3000,
            PromptVariant::WeeklyImportance
            | PromptVariant::EvidenceExtraction
            | PromptVariant::Translation => 2000,
        }
    }

    pub fn default_temperature(&self) -> f32 {
        match self {
            PromptVariant::ImpactSelection | PromptVariant::ImpactFinalSelection => 0.2,
            _ => 0.1,
        }
    }

    pub fn default_call(&self) -> CallSettings {
        CallSettings { max_tokens: self.max_output_tokens(), temperature: self.default_temperature() }
    }
}

// ── Item renderers ────────────────────────────────────────────────────────────

/// Plain-text block for one fetched article.
pub fn render_article(record: &ArticleRecord) -> String {
    format!(
        "PMID: {}\nTitle: {}\nAbstract: {}\nJournal: {}\nYear: {}\n\n",
        record.pmid, record.title, record.abstract_text, record.journal, record.publication_year
    )
}

/// Compact JSON for one candidate, non-ASCII kept literal.
pub fn render_candidate(item: &SelectedArticle) -> String {
    serde_json::to_string(item).unwrap_or_default()
}

fn candidates_json(items: &[SelectedArticle]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

// ── Templates ─────────────────────────────────────────────────────────────────

pub fn impact_selection(articles: &[ArticleRecord], max_selected: usize) -> String {
    let text: String = articles.iter().map(render_article).collect();
    format!(
        r#"
You are a medical research expert. Analyze these academic articles and:
1) Identify the most impactful articles (at most {max_selected}), prioritizing:
   - Articles published in high-impact journals (e.g., NEJM, Lancet, JAMA, Science, Nature, Cell)
   - Articles with groundbreaking findings or methodologies
   - Articles with significant clinical relevance
   - Studies with rigorous research designs (RCTs, well-designed cohort studies, systematic reviews)

2) For each selected article, provide:
   - Why it is impactful (novelty, methodology, clinical significance, journal reputation)
   - A concise summary (2-3 sentences)
   - Potential implications for clinical practice or future research

Articles to analyze:
{text}
Return a single JSON array. Each element has this structure:
{{
    "pmid": string,
    "journal": string,
    "publication_year": string,
    "impact_reason": string,
    "summary": string,
    "implications": string
}}

Keep every text field clear and concise. Quality over quantity.

IMPORTANT: If none of the articles meet the bar, return an empty array []. Do not select weak articles just to provide a response.
"#
    )
}

pub fn impact_final_selection(candidates: &[SelectedArticle], max_selected: usize) -> String {
    let json = candidates_json(candidates);
    format!(
        r#"
You are a medical research expert. The candidates below were pre-selected from several batches of today's articles.
Choose at most {max_selected} of them: the ones with the greatest clinical impact. Order them from most to least important.

Candidates:
{json}

Return a single JSON array containing the chosen candidates with their original fields and pmid values unchanged.
Only use pmids that appear in the candidate list.
If none of the candidates are truly impactful, return an empty array [].
"#
    )
}

pub fn weekly_importance(candidates: &[SelectedArticle], max_selected: usize, language: &str) -> String {
    let json = candidates_json(candidates);
    format!(
        r#"
You are a medical research expert. From the articles below, select only the {cap} most important articles of this week.

## Articles
{json}

## Selection criteria (in priority order)
1. Immediate impact on clinical practice
   - could change the current standard of care
   - could substantially improve patient outcomes
   - likely to lead to guideline revisions
2. Scientific breakthrough
   - fundamentally changes the understanding of pathophysiology
   - identifies a new therapeutic target
   - overturns established consensus
3. Quality and reliability
   - large randomized controlled trials
   - high-quality meta-analyses
   - publication in top journals (NEJM, Lancet, JAMA, Nature Medicine)
4. Societal impact
   - may influence health policy or health economics
   - affects many patients

## Important
- Never pad the list. Select an article only if it truly deserves a place in a weekly report.
- Pick "the most important articles of the week", not merely "good articles".
- Write every natural-language value in {language}.

Return a single JSON array, most important first:
[
  {{
    "pmid": "PMID of the article",
    "journal": "journal name",
    "publication_year": "publication year",
    "title": "article title",
    "weekly_importance_reason": "why this is one of the most important articles this week",
    "key_findings": "the three most important findings",
    "clinical_impact": "concrete impact on clinical practice",
    "paradigm_shift": "paradigm shift this article brings, if any",
    "immediate_action": "what clinicians should know or do now",
    "related_articles": ["PMIDs of related articles, if any"]
  }}
]

If no article qualifies, return an empty array [].
"#,
        cap = cap_phrase(max_selected)
    )
}

pub fn weekly_final_selection(candidates: &[SelectedArticle], max_selected: usize, language: &str) -> String {
    let json = candidates_json(candidates);
    format!(
        r#"
You are a medical research expert. From the candidates below, select only the {cap} articles that must be in this week's report.

## Candidates
{json}

## Final criteria
1. Report value: clinicians would not want to miss it
2. Practical impact: could change clinical practice from tomorrow
3. Originality: findings not available from the other candidates
4. Urgency: information that should be known now

## Guidance
- When several candidates cover the same topic, keep only the most influential one.
- "Interesting" is not enough; it must be important and practical.
- Keep the original data structure and pmid values. Only use pmids from the candidate list.
- You may update weekly_importance_reason to explain why the article belongs in the top {max_selected}. Write it in {language}.

Return a single JSON array of the selected candidates ordered by importance.
If none qualify, return an empty array [].
"#,
        cap = cap_phrase(max_selected)
    )
}

pub fn evidence_extraction(
    candidates: &[SelectedArticle],
    questions: &[ClinicalQuestion],
    language: &str,
) -> String {
    let articles = candidates_json(candidates);
    let cqs = serde_json::to_string(questions).unwrap_or_else(|_| "[]".to_string());
    let skeleton = questions
        .iter()
        .map(|q| format!("  \"{}\": []", q.id))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        r#"
You are an expert in critical care research. Analyze the articles below and extract those that serve as evidence for the clinical questions (CQ).

## Articles
{articles}

## Clinical questions
{cqs}

## Instructions
1. For each CQ, extract the articles that could serve as evidence for it.
2. An article qualifies when:
   - its title or abstract contains related keywords
   - the study addresses the CQ directly
   - higher levels of evidence (RCTs, meta-analyses, systematic reviews) matter most
   - articles in high-impact journals (NEJM, Lancet, JAMA, Nature) take priority
3. For each article give pmid, journal, publication_year, title, summary and evidence_value (why it matters as evidence for that CQ).
4. If no article relates to a CQ, return an empty array for that CQ.
5. Write summary and evidence_value in {language}.

Return a single JSON object with exactly these keys, each mapping to an array of objects with the fields above:
{{
{skeleton}
}}
"#
    )
}

pub fn translation(document: &Value, target_language: &str) -> String {
    let json = serde_json::to_string(document).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"
You are a medical research expert. Translate the JSON data below into {target_language}.
Keep the JSON structure exactly as it is and translate only the values.
Translate medical terms into the appropriate {target_language} terminology, keeping the English term in parentheses where helpful.

Field instructions:
- pmid: do not translate
- journal: do not translate (keep the journal name)
- publication_year: do not translate
- impact_reason: translate
- summary: translate
- implications: translate

JSON to translate:
{json}

Return a single JSON object. Keep every key name in English and translate only the values.
If a list is empty, keep it empty.
"#
    )
}

fn cap_phrase(max_selected: usize) -> String {
    match max_selected {
        0 | 1 => "1".to_string(),
        2 => "1-2".to_string(),
        3 => "2-3".to_string(),
        n => format!("up to {n}"),
    }
}
