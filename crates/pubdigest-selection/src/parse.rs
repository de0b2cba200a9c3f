//! Tolerant JSON extraction from free-form model output.
//!
//! Models wrap answers in prose or code fences. Order of attempts:
//! strict parse of the whole text, then the longest balanced `[..]`/`{..}`
//! span that parses, then first-open..last-close. Nothing parses →
//! `ResponseParseError`.

use pubdigest_common::{DigestError, Result, SelectedArticle};
use serde_json::Value;
use tracing::debug;

/// Top-level JSON type a prompt variant asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Array,
    Object,
}

impl Shape {
    fn delimiters(self) -> (u8, u8) {
        match self {
            Shape::Array => (b'[', b']'),
            Shape::Object => (b'{', b'}'),
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Shape::Array => value.is_array(),
            Shape::Object => value.is_object(),
        }
    }
}

pub fn extract_json(text: &str, shape: Shape) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if shape.matches(&value) {
            return Ok(value);
        }
    }

    let (open, close) = shape.delimiters();
    if let Some(value) = longest_balanced(trimmed, open, close) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (
        trimmed.bytes().position(|b| b == open),
        trimmed.bytes().rposition(|b| b == close),
    ) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if shape.matches(&value) {
                    return Ok(value);
                }
            }
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(DigestError::ResponseParse(format!(
        "no JSON {} found in model output ({} chars): {preview}",
        match shape {
            Shape::Array => "array",
            Shape::Object => "object",
        },
        trimmed.len()
    )))
}

/// Scan top-level balanced spans (string- and escape-aware) and keep the
/// longest one that parses.
fn longest_balanced(text: &str, open: u8, close: u8) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, Value)> = None;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != open {
            i += 1;
            continue;
        }
        match balanced_end(bytes, i, open, close) {
            Some(end) => match serde_json::from_str::<Value>(&text[i..=end]) {
                Ok(value) => {
                    let len = end + 1 - i;
                    if best.as_ref().map_or(true, |(l, _)| len > *l) {
                        best = Some((len, value));
                    }
                    i = end + 1;
                }
                Err(_) => i += 1,
            },
            None => i += 1,
        }
    }
    best.map(|(_, v)| v)
}

fn balanced_end(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turn a parsed answer into candidates. Accepts an array of objects, a
/// single object with `pmid`, or an object wrapping one array
/// (`{"articles": [...]}`). Entries without a usable pmid are dropped.
pub fn candidates_from_value(value: Value) -> Vec<SelectedArticle> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(to_candidate).collect(),
        Value::Object(map) if map.contains_key("pmid") => {
            to_candidate(Value::Object(map)).into_iter().collect()
        }
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .map(|items| items.into_iter().filter_map(to_candidate).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn to_candidate(value: Value) -> Option<SelectedArticle> {
    if !value.is_object() {
        return None;
    }
    match serde_json::from_value::<SelectedArticle>(value) {
        Ok(mut article) => {
            article.pmid = article.pmid.trim().to_string();
            (!article.pmid.is_empty()).then_some(article)
        }
        Err(e) => {
            debug!(error = %e, "Dropping model entry without pmid");
            None
        }
    }
}
