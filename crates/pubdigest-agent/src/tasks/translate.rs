//! Translation of an analysis document into the report language.

use std::collections::HashMap;

use async_trait::async_trait;
use pubdigest_common::keys::{translation_key, DocKind};
use pubdigest_common::{DigestError, Result};
use pubdigest_selection::prompts;
use pubdigest_selection::{CallSettings, PromptVariant};
use pubdigest_store::{read_json, write_json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{to_body, DigestTask};
use crate::context::TaskContext;
use crate::envelope::{self, ObjectRef};

/// Fields copied back from the source: the model must not rewrite them.
const PRESERVED_FIELDS: &[&str] = &["pmid", "journal", "publication_year"];

#[derive(Debug, Clone, Serialize)]
pub struct TranslateSummary {
    pub bucket: String,
    pub input_key: String,
    pub output_key: String,
    pub message: String,
}

pub struct TranslateTask;

#[async_trait]
impl DigestTask for TranslateTask {
    fn name(&self) -> &str { "translate" }

    fn description(&self) -> &str {
        "Translate an analysis document into the report language, keeping its structure."
    }

    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value> {
        let target = envelope::object_ref(&event, &["output_key", "key"])?;
        to_body(&run(ctx, &target).await?)
    }
}

pub async fn run(ctx: &TaskContext, target: &ObjectRef) -> Result<TranslateSummary> {
    target.check_bucket(ctx.bucket())?;
    let key = target.key.as_str();
    if DocKind::classify(key) != DocKind::Analysis {
        return Err(DigestError::InvalidInput(format!("'{key}' is not an analysis document")));
    }

    let pipeline = ctx.pipeline("translate")?;

    let source: Value = read_json(ctx.store.as_ref(), key).await?;
    let settings = &ctx.settings;
    let call = CallSettings {
        max_tokens: settings.llm.translate_max_tokens,
        temperature: settings.llm.rollup_temperature,
    };
    let prompt = prompts::translation(&source, &settings.translate.target_language);
    let mut translated = pipeline
        .invoke_json(&prompt, PromptVariant::Translation.response_shape(), call)
        .await?;

    restore_preserved(&source, &mut translated);
    stamp_metadata(&source, &mut translated, &ctx.timestamp(), &settings.translate.target_language_code);

    let output_key = translation_key(key);
    write_json(ctx.store.as_ref(), &output_key, &translated).await?;
    info!(key = %output_key, "Stored translation");

    Ok(TranslateSummary {
        bucket: ctx.bucket().to_string(),
        input_key: key.to_string(),
        output_key,
        message: "Translation completed successfully".to_string(),
    })
}

/// Copy identifier fields of `impactful_articles` back from the source.
///
/// Each translated entry is joined to its source entry by pmid. Position is
/// used only for entries without a pmid, and only when both lists have the
/// same length. Entries that join to nothing are dropped.
fn restore_preserved(source: &Value, translated: &mut Value) {
    let (Some(originals), Some(items)) = (
        source["impactful_articles"].as_array(),
        translated.get_mut("impactful_articles").and_then(Value::as_array_mut),
    ) else {
        return;
    };
    let by_pmid: HashMap<String, &Value> =
        originals.iter().filter_map(|o| pmid_of(o).map(|p| (p, o))).collect();
    let positional = originals.len() == items.len();
    if !positional {
        debug!(source = originals.len(), translated = items.len(), "Translated list length differs");
    }

    let mut restored = Vec::with_capacity(items.len());
    for (index, item) in std::mem::take(items).into_iter().enumerate() {
        let original = match pmid_of(&item) {
            Some(pmid) => by_pmid.get(&pmid).copied(),
            None if positional => originals.get(index),
            None => None,
        };
        let (Some(original), Value::Object(mut fields)) = (original, item) else {
            warn!(index, "Dropping translated entry that matches no source article");
            continue;
        };
        for field in PRESERVED_FIELDS {
            if let Some(v) = original.get(*field) {
                fields.insert((*field).to_string(), v.clone());
            }
        }
        restored.push(Value::Object(fields));
    }
    *items = restored;
}

/// The pmid of a document entry, trimmed, with full-width digits folded to ASCII.
fn pmid_of(entry: &Value) -> Option<String> {
    let pmid: String = match entry.get("pmid")? {
        Value::String(s) => s
            .trim()
            .chars()
            .map(|c| match c {
                '０'..='９' => char::from_digit(c as u32 - '０' as u32, 10).unwrap_or(c),
                _ => c,
            })
            .collect(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!pmid.is_empty()).then_some(pmid)
}

fn stamp_metadata(source: &Value, translated: &mut Value, at: &str, target_language: &str) {
    let Some(doc) = translated.as_object_mut() else { return };
    let metadata = doc
        .entry("metadata")
        .or_insert_with(|| source.get("metadata").cloned().unwrap_or_else(|| json!({})));
    if let Some(m) = metadata.as_object_mut() {
        m.insert("translation_date".into(), json!(at));
        m.insert("original_language".into(), json!("en"));
        m.insert("target_language".into(), json!(target_language));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_preserved_overwrites_rewritten_identifiers() {
        let source = json!({"impactful_articles": [
            {"pmid": "1", "journal": "NEJM", "publication_year": "2024", "summary": "en"}
        ]});
        let mut translated = json!({"impactful_articles": [
            {"pmid": "１", "journal": "ニューイングランド", "summary": "日本語"}
        ]});
        restore_preserved(&source, &mut translated);
        let item = &translated["impactful_articles"][0];
        assert_eq!(item["pmid"], "1");
        assert_eq!(item["journal"], "NEJM");
        assert_eq!(item["publication_year"], "2024");
        assert_eq!(item["summary"], "日本語");
    }

    #[test]
    fn test_restore_preserved_joins_reordered_entries_by_pmid() {
        let source = json!({"impactful_articles": [
            {"pmid": "111", "journal": "NEJM", "publication_year": "2024"},
            {"pmid": "222", "journal": "Critical Care", "publication_year": "2023"}
        ]});
        let mut translated = json!({"impactful_articles": [
            {"pmid": "222", "journal": "クリティカルケア", "summary": "B-ja"},
            {"pmid": "111", "summary": "A-ja"}
        ]});
        restore_preserved(&source, &mut translated);
        let items = translated["impactful_articles"].as_array().unwrap();
        assert_eq!(items[0]["pmid"], "222");
        assert_eq!(items[0]["journal"], "Critical Care");
        assert_eq!(items[0]["publication_year"], "2023");
        assert_eq!(items[0]["summary"], "B-ja");
        assert_eq!(items[1]["pmid"], "111");
        assert_eq!(items[1]["journal"], "NEJM");
        assert_eq!(items[1]["summary"], "A-ja");
    }

    #[test]
    fn test_restore_preserved_drops_unmatched_entries() {
        let source = json!({"impactful_articles": [
            {"pmid": "111", "journal": "NEJM"},
            {"pmid": "222", "journal": "Critical Care"}
        ]});
        let mut translated = json!({"impactful_articles": [
            {"pmid": "333", "summary": "invented"},
            {"summary": "no pmid, lengths differ"},
            {"pmid": 111, "summary": "A-ja"}
        ]});
        restore_preserved(&source, &mut translated);
        let items = translated["impactful_articles"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["pmid"], "111");
        assert_eq!(items[0]["summary"], "A-ja");
    }

    #[test]
    fn test_restore_preserved_positional_only_without_pmid() {
        let source = json!({"impactful_articles": [{"pmid": "111", "journal": "NEJM"}]});
        let mut translated = json!({"impactful_articles": [{"summary": "A-ja"}]});
        restore_preserved(&source, &mut translated);
        assert_eq!(translated["impactful_articles"][0]["pmid"], "111");
        assert_eq!(translated["impactful_articles"][0]["journal"], "NEJM");
    }

    #[test]
    fn test_metadata_stamped_or_copied() {
        let source = json!({"metadata": {"search_term": "sepsis"}});
        let mut with_meta = json!({"metadata": {"search_term": "敗血症"}});
        stamp_metadata(&source, &mut with_meta, "2024-05-06T00:00:00Z", "ja");
        assert_eq!(with_meta["metadata"]["search_term"], "敗血症");
        assert_eq!(with_meta["metadata"]["original_language"], "en");
        assert_eq!(with_meta["metadata"]["target_language"], "ja");

        let mut without = json!({"impactful_articles": []});
        stamp_metadata(&source, &mut without, "t", "ja");
        assert_eq!(without["metadata"]["search_term"], "sepsis");
        assert_eq!(without["metadata"]["translation_date"], "t");
    }
}
