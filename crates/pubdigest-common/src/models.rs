//! Data model shared by every stage: fetched article records, model-attributed
//! selections, and the JSON documents persisted in the object store.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Keys owned by [`ArticleRecord`] itself; downstream annotations may not reuse them.
const RECORD_KEYS: &[&str] = &[
    "pmid", "title", "abstract", "journal", "publication_year", "authors", "fetch_date",
];

/// One article as fetched from the literature API.
///
/// `pmid`, `title` and `abstract` are never rewritten after fetch; later stages
/// only add entries to `extra` through [`ArticleRecord::annotate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(default, deserialize_with = "lenient::string_or_number")]
    pub pmid: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub journal: String,
    #[serde(default, deserialize_with = "lenient::string_or_number")]
    pub publication_year: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArticleRecord {
    pub fn new(pmid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            pmid: pmid.into(),
            title: title.into(),
            abstract_text: String::new(),
            journal: String::new(),
            publication_year: String::new(),
            authors: Vec::new(),
            fetch_date: None,
            extra: Map::new(),
        }
    }

    /// Add a downstream field. Returns `false` (and changes nothing) when the
    /// key belongs to the fetched record itself.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if RECORD_KEYS.contains(&key.as_str()) {
            return false;
        }
        self.extra.insert(key, value);
        true
    }
}

/// Insertion-ordered mapping pmid → record for one fetch cycle.
///
/// Serialised as a JSON object keyed by pmid; on read, document order is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleCollection {
    records: Vec<ArticleRecord>,
    index: HashMap<String, usize>,
}

impl ArticleCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. An existing pmid is replaced in place and the old
    /// record returned.
    pub fn insert(&mut self, record: ArticleRecord) -> Option<ArticleRecord> {
        match self.index.get(&record.pmid) {
            Some(&pos) => Some(std::mem::replace(&mut self.records[pos], record)),
            None => {
                self.index.insert(record.pmid.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    pub fn get(&self, pmid: &str) -> Option<&ArticleRecord> {
        self.index.get(pmid).map(|&pos| &self.records[pos])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArticleRecord> {
        self.records.iter()
    }

    pub fn pmids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.pmid.as_str())
    }
}

impl FromIterator<ArticleRecord> for ArticleCollection {
    fn from_iter<I: IntoIterator<Item = ArticleRecord>>(iter: I) -> Self {
        let mut collection = ArticleCollection::new();
        for record in iter {
            collection.insert(record);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a ArticleCollection {
    type Item = &'a ArticleRecord;
    type IntoIter = std::slice::Iter<'a, ArticleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Serialize for ArticleCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.pmid, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ArticleCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CollectionVisitor;

        impl<'de> Visitor<'de> for CollectionVisitor {
            type Value = ArticleCollection;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping pmid to article record")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut collection = ArticleCollection::new();
                while let Some((key, mut record)) = access.next_entry::<String, ArticleRecord>()? {
                    if record.pmid.trim().is_empty() {
                        record.pmid = key;
                    }
                    collection.insert(record);
                }
                Ok(collection)
            }
        }

        deserializer.deserialize_map(CollectionVisitor)
    }
}

/// An article as returned by the language model: the identifier plus
/// whatever model-attributed fields the prompt variant asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedArticle {
    #[serde(deserialize_with = "lenient::string_or_number")]
    pub pmid: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SelectedArticle {
    pub fn new(pmid: impl Into<String>) -> Self {
        Self { pmid: pmid.into(), fields: Map::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Question id → evidence entries, in clinical-question table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceMap {
    entries: Vec<(String, Vec<SelectedArticle>)>,
}

impl EvidenceMap {
    /// An empty list for every question id, in the given order.
    pub fn with_questions<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            entries: ids.into_iter().map(|id| (id.to_string(), Vec::new())).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&[SelectedArticle]> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v.as_slice())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Vec<SelectedArticle>> {
        self.entries.iter_mut().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SelectedArticle])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn question_count(&self) -> usize {
        self.entries.len()
    }

    /// Total entries across all questions.
    pub fn total_entries(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn has_evidence(&self) -> bool {
        self.entries.iter().any(|(_, v)| !v.is_empty())
    }
}

impl Serialize for EvidenceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, list) in &self.entries {
            map.serialize_entry(id, list)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EvidenceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EvidenceVisitor;

        impl<'de> Visitor<'de> for EvidenceVisitor {
            type Value = EvidenceMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping question id to evidence list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((id, list)) = access.next_entry::<String, Vec<SelectedArticle>>()? {
                    entries.push((id, list));
                }
                Ok(EvidenceMap { entries })
            }
        }

        deserializer.deserialize_map(EvidenceVisitor)
    }
}

// ── Persisted documents ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// `days` before `today` through `today`, inclusive.
    pub fn trailing_days(today: NaiveDate, days: u32) -> Self {
        let from = today - chrono::Duration::days(i64::from(days));
        Self { from, to: today }
    }
}

/// Output of the daily fetch (`pubmed_<term>_<date>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchDocument {
    pub metadata: FetchMetadata,
    pub articles: ArticleCollection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchMetadata {
    #[serde(default)]
    pub search_term: String,
    #[serde(default)]
    pub search_date: String,
    #[serde(default)]
    pub total_articles: usize,
    pub date_range: Option<DateRange>,
}

/// Output of impact selection (`..._analysis.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub metadata: AnalysisMetadata,
    #[serde(default)]
    pub impactful_articles: Vec<SelectedArticle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    #[serde(default)]
    pub original_file: String,
    #[serde(default)]
    pub analysis_date: String,
    #[serde(default)]
    pub search_term: String,
    #[serde(default)]
    pub total_analyzed: usize,
    #[serde(default)]
    pub total_selected: usize,
}

/// Weekly highlight rollup (`weekly_critical_...json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyCriticalDocument {
    pub metadata: WeeklyCriticalMetadata,
    pub weekly_highlights: WeeklyHighlights,
    pub critical_articles: Vec<SelectedArticle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyCriticalMetadata {
    pub generated_date: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub search_term: String,
    pub files_analyzed: usize,
    pub total_articles_reviewed: usize,
    pub articles_selected: usize,
    pub report_type: String,
    pub selection_criteria: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyHighlights {
    pub summary: String,
    pub selection_rationale: String,
    pub top_journals: Vec<String>,
}

/// Weekly clinical-question evidence rollup (`weekly_evidence_...json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyEvidenceDocument {
    pub metadata: WeeklyEvidenceMetadata,
    pub evidence_articles: EvidenceMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyEvidenceMetadata {
    pub generated_date: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub search_term: String,
    pub files_analyzed: usize,
    pub articles_analyzed: usize,
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Accept `"38123456"` or `38123456`; models are not consistent about it.
    pub fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number, got {other}"
            ))),
        }
    }
}
