//! Gathering for the weekly rollups: recent analysis documents and their
//! selected articles.

use pubdigest_common::keys::{matches_topic, DocKind};
use pubdigest_common::models::AnalysisDocument;
use pubdigest_common::{Result, SelectedArticle};
use pubdigest_selection::merge_candidates;
use pubdigest_store::{read_json, ListFilter};
use tracing::{info, warn};

use crate::context::TaskContext;

pub(crate) struct Gathered {
    pub files: Vec<String>,
    pub articles: Vec<SelectedArticle>,
}

/// Analysis documents modified within the last `window_days` (calendar
/// dates, UTC), optionally restricted to one topic. Unreadable files are
/// skipped.
pub(crate) async fn gather_recent(
    ctx: &TaskContext,
    window_days: u32,
    term: Option<&str>,
    annotate: bool,
) -> Result<Gathered> {
    let floor = ctx.today() - chrono::Duration::days(i64::from(window_days));
    let listed = ctx
        .store
        .list(&ListFilter::analysis_documents().modified_since(floor))
        .await?;

    let files: Vec<String> = listed
        .into_iter()
        .map(|m| m.key)
        .filter(|k| DocKind::classify(k) == DocKind::Analysis)
        .filter(|k| term.map_or(true, |t| matches_topic(k, t)))
        .collect();
    info!(files = files.len(), term = term.unwrap_or("all terms"), since = %floor, "Found analysis files");

    let mut articles = Vec::new();
    for key in &files {
        let doc = match read_json::<AnalysisDocument>(ctx.store.as_ref(), key).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping unreadable analysis file");
                continue;
            }
        };
        let analysis_date = doc.metadata.analysis_date;
        for mut article in doc.impactful_articles {
            if annotate {
                article.set_field("source_file", key.as_str());
                article.set_field("analysis_date", analysis_date.as_str());
            }
            articles.push(article);
        }
    }

    let articles = merge_candidates(articles);
    info!(articles = articles.len(), "Gathered selected articles");
    Ok(Gathered { files, articles })
}
