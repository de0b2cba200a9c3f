//! Object-key naming convention.
//!
//! Durable state is a flat namespace of JSON documents:
//!
//! ```text
//!   pubmed_<term>_<stamp>.json                 daily fetch
//!   pubmed_<term>_<stamp>_analysis.json        impact selection
//!   pubmed_<term>_<stamp>_jp_analysis.json     translation
//!   weekly_critical[_<term>]_<stamp>.json      weekly highlights
//!   weekly_analysis[_<term>]_<stamp>.json      weekly rollup (legacy name)
//!   weekly_evidence[_<term>]_<stamp>.json      weekly clinical-question evidence
//! ```
//!
//! The suffixes are used as filters, not just labels: rollups scan only
//! [`DocKind::Analysis`] keys.

use chrono::NaiveDateTime;

pub const FETCH_PREFIX: &str = "pubmed_";
pub const JSON_SUFFIX: &str = ".json";
pub const ANALYSIS_SUFFIX: &str = "_analysis.json";
pub const TRANSLATION_SUFFIX: &str = "_jp_analysis.json";
pub const WEEKLY_PREFIX: &str = "weekly_";

/// Timestamp precision embedded in keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStamp {
    /// `YYYYMMDD`
    #[default]
    Day,
    /// `YYYYMMDD_HHMMSS`
    DayTime,
}

impl KeyStamp {
    pub fn render(&self, at: NaiveDateTime) -> String {
        match self {
            KeyStamp::Day => at.format("%Y%m%d").to_string(),
            KeyStamp::DayTime => at.format("%Y%m%d_%H%M%S").to_string(),
        }
    }
}

/// Rollup document families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeeklyDoc {
    Critical,
    Analysis,
    Evidence,
}

impl WeeklyDoc {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeeklyDoc::Critical => "weekly_critical",
            WeeklyDoc::Analysis => "weekly_analysis",
            WeeklyDoc::Evidence => "weekly_evidence",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        if !key.starts_with(WEEKLY_PREFIX) {
            return None;
        }
        [WeeklyDoc::Critical, WeeklyDoc::Analysis, WeeklyDoc::Evidence]
            .into_iter()
            .find(|d| key.starts_with(&format!("{}_", d.as_str())))
    }
}

/// Classification of an object key by naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Fetch,
    Analysis,
    Translation,
    Weekly(WeeklyDoc),
    Other,
}

impl DocKind {
    pub fn classify(key: &str) -> Self {
        let name = basename(key);
        if let Some(doc) = WeeklyDoc::from_key(name) {
            return DocKind::Weekly(doc);
        }
        if !name.ends_with(JSON_SUFFIX) {
            return DocKind::Other;
        }
        if name.ends_with(TRANSLATION_SUFFIX) {
            DocKind::Translation
        } else if name.ends_with(ANALYSIS_SUFFIX) {
            DocKind::Analysis
        } else if name.starts_with(FETCH_PREFIX) {
            DocKind::Fetch
        } else {
            DocKind::Other
        }
    }
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Replace every character outside `[A-Za-z0-9]` with `_`.
pub fn safe_term(term: &str) -> String {
    term.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn fetch_key(term: &str, stamp: &str) -> String {
    format!("{FETCH_PREFIX}{}_{stamp}{JSON_SUFFIX}", safe_term(term))
}

/// `pubmed_x_20240101.json` → `pubmed_x_20240101_analysis.json`
pub fn analysis_key(fetch_key: &str) -> String {
    let base = fetch_key.strip_suffix(JSON_SUFFIX).unwrap_or(fetch_key);
    format!("{base}{ANALYSIS_SUFFIX}")
}

/// `..._analysis.json` → `..._jp_analysis.json`
pub fn translation_key(analysis_key: &str) -> String {
    let base = analysis_key
        .strip_suffix(ANALYSIS_SUFFIX)
        .or_else(|| analysis_key.strip_suffix(JSON_SUFFIX))
        .unwrap_or(analysis_key);
    format!("{base}{TRANSLATION_SUFFIX}")
}

pub fn weekly_key(doc: WeeklyDoc, term: Option<&str>, stamp: &str) -> String {
    match term.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => format!("{}_{}_{stamp}{JSON_SUFFIX}", doc.as_str(), safe_term(t).to_lowercase()),
        None => format!("{}_{stamp}{JSON_SUFFIX}", doc.as_str()),
    }
}

/// Whether `key` belongs to the fetch cycle of `term` (case-insensitive).
pub fn matches_topic(key: &str, term: &str) -> bool {
    let needle = format!("{FETCH_PREFIX}{}_", safe_term(term).to_lowercase());
    basename(key).to_lowercase().starts_with(&needle)
}
