//! Task input decoding.
//!
//! A task receives either a direct parameter object (`{"bucket": .., "key": ..}`)
//! or an S3 notification envelope (`{"Records": [{"eventSource": "aws:s3", "s3": ..}]}`).

use pubdigest_common::{DigestError, Result};
use serde_json::Value;

/// Object named by an event. `bucket` is absent when the caller relies on
/// the configured bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: Option<String>,
    pub key: String,
}

impl ObjectRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self { bucket: None, key: key.into() }
    }

    /// Reject events addressed to a bucket this process is not bound to.
    pub fn check_bucket(&self, configured: &str) -> Result<()> {
        match &self.bucket {
            Some(b) if b != configured => Err(DigestError::InvalidInput(format!(
                "event names bucket '{b}' but this store is bound to '{configured}'"
            ))),
            _ => Ok(()),
        }
    }
}

/// Decode the object reference. `key_fields` are tried in order on the
/// direct form (translate accepts `output_key` as well as `key`).
pub fn object_ref(event: &Value, key_fields: &[&str]) -> Result<ObjectRef> {
    if let Some(key) = key_fields.iter().find_map(|f| non_empty(&event[*f])) {
        return Ok(ObjectRef { bucket: non_empty(&event["bucket"]), key });
    }

    if let Some(record) = event["Records"].as_array().and_then(|r| r.first()) {
        let source = record["eventSource"].as_str().unwrap_or("aws:s3");
        if source != "aws:s3" {
            return Err(DigestError::InvalidInput(format!("unsupported event source '{source}'")));
        }
        let bucket = non_empty(&record["s3"]["bucket"]["name"]);
        let key = non_empty(&record["s3"]["object"]["key"]);
        if let (Some(bucket), Some(key)) = (bucket, key) {
            return Ok(ObjectRef { bucket: Some(bucket), key });
        }
    }

    Err(DigestError::InvalidInput(format!(
        "expected an S3 event or a direct {} field",
        key_fields.join("/")
    )))
}

/// Optional topic filter (`search_term`).
pub fn search_term(event: &Value) -> Option<String> {
    non_empty(&event["search_term"])
}

/// Topics for a fetch run: `search_terms` (array or comma list), else
/// `search_term`. `None` means use the configured terms.
pub fn search_terms(event: &Value) -> Option<Vec<String>> {
    let terms: Vec<String> = match &event["search_terms"] {
        Value::Array(items) => items.iter().filter_map(non_empty).collect(),
        Value::String(s) => s.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect(),
        _ => search_term(event).into_iter().collect(),
    };
    (!terms.is_empty()).then_some(terms)
}

fn non_empty(value: &Value) -> Option<String> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
