//! Merge per-chunk answers into one list, unique by pmid.
//!
//! Policy: the earliest occurrence keeps its position, the latest occurrence
//! supplies the content.

use std::collections::HashMap;

use pubdigest_common::{ArticleRecord, SelectedArticle};

/// Items that carry the pmid a model answer is joined on.
pub trait Identified {
    fn identifier(&self) -> &str;
}

impl Identified for ArticleRecord {
    fn identifier(&self) -> &str {
        self.pmid.trim()
    }
}

impl Identified for SelectedArticle {
    fn identifier(&self) -> &str {
        self.pmid.trim()
    }
}

impl Identified for String {
    fn identifier(&self) -> &str {
        self.trim()
    }
}

impl Identified for &str {
    fn identifier(&self) -> &str {
        self.trim()
    }
}

pub fn merge_candidates(items: impl IntoIterator<Item = SelectedArticle>) -> Vec<SelectedArticle> {
    let mut merged: Vec<SelectedArticle> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for mut item in items {
        item.pmid = item.pmid.trim().to_string();
        match slots.get(&item.pmid) {
            Some(&slot) => merged[slot] = item,
            None => {
                slots.insert(item.pmid.clone(), merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

/// Field-wise overlay: `base` fields, replaced or extended by `update`.
pub fn overlay(base: &SelectedArticle, update: SelectedArticle) -> SelectedArticle {
    let mut out = base.clone();
    for (k, v) in update.fields {
        out.fields.insert(k, v);
    }
    out
}
