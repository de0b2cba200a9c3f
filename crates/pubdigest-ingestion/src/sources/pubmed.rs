//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pubdigest_common::models::DateRange;
use pubdigest_common::{ArticleCollection, ArticleRecord, DigestError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use super::LiteratureSource;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const USER_AGENT: &str = concat!("pubdigest/", env!("CARGO_PKG_VERSION"));

/// Ids per efetch request. NCBI recommends POST above ~200 ids; batching
/// keeps every request a plain GET.
pub const EFETCH_BATCH: usize = 200;
pub const DEFAULT_RETMAX: usize = 1000;

pub struct PubMedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    retmax: usize,
}

impl PubMedClient {
    pub fn new(api_key: Option<SecretString>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DigestError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: EUTILS_BASE.to_string(), api_key, retmax: DEFAULT_RETMAX })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retmax(mut self, retmax: usize) -> Self {
        self.retmax = retmax;
        self
    }

    fn with_api_key(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.expose_secret().to_string()));
        }
        params
    }

    async fn get_text(&self, endpoint: &str, params: &[(&'static str, String)]) -> Result<String> {
        let url = format!("{}/{endpoint}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| DigestError::UpstreamRequest(format!("{endpoint}: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| DigestError::UpstreamRequest(format!("{endpoint}: reading body: {e}")))?;
        if !status.is_success() {
            let excerpt: String = body.chars().take(200).collect();
            return Err(DigestError::UpstreamRequest(format!(
                "{endpoint} returned {status}: {excerpt}"
            )));
        }
        Ok(body)
    }

    /// Search PubMed by entry date and return PMIDs.
    #[instrument(skip(self))]
    async fn esearch(&self, term: &str, range: &DateRange) -> Result<Vec<String>> {
        let params = self.with_api_key(vec![
            ("db", "pubmed".to_string()),
            ("term", term.to_string()),
            ("retmode", "json".to_string()),
            ("retmax", self.retmax.to_string()),
            ("datetype", "edat".to_string()),
            ("mindate", range.from.format("%Y/%m/%d").to_string()),
            ("maxdate", range.to.format("%Y/%m/%d").to_string()),
        ]);
        let body = self.get_text("esearch.fcgi", &params).await?;
        let ids = parse_esearch_ids(&body)?;
        debug!(count = ids.len(), "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    /// Fetch abstract-mode XML for one batch of PMIDs.
    #[instrument(skip(self, pmids), fields(batch = pmids.len()))]
    async fn efetch(&self, pmids: &[String]) -> Result<Vec<ArticleRecord>> {
        let params = self.with_api_key(vec![
            ("db", "pubmed".to_string()),
            ("id", pmids.join(",")),
            ("rettype", "abstract".to_string()),
            ("retmode", "xml".to_string()),
        ]);
        let xml = self.get_text("efetch.fcgi", &params).await?;
        parse_pubmed_xml(&xml)
    }
}

#[async_trait]
impl LiteratureSource for PubMedClient {
    async fn search_ids(&self, term: &str, range: &DateRange) -> Result<Vec<String>> {
        self.esearch(term, range).await
    }

    async fn fetch_records(&self, pmids: &[String]) -> Result<ArticleCollection> {
        let mut collection = ArticleCollection::new();
        let fetched_at = Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();

        for batch in pmids.chunks(EFETCH_BATCH) {
            for mut record in self.efetch(batch).await? {
                record.fetch_date = Some(fetched_at.clone());
                collection.insert(record);
            }
        }
        info!(requested = pmids.len(), parsed = collection.len(), "PubMed efetch complete");
        Ok(collection)
    }

    fn name(&self) -> &str {
        "pubmed"
    }
}

/// Extract `esearchresult.idlist` from an esearch JSON body.
pub fn parse_esearch_ids(body: &str) -> Result<Vec<String>> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| DigestError::UpstreamRequest(format!("esearch returned invalid JSON: {e}")))?;
    let result = &json["esearchresult"];
    if let Some(err) = result["ERROR"].as_str().or_else(|| json["error"].as_str()) {
        return Err(DigestError::UpstreamRequest(format!("esearch error: {err}")));
    }
    Ok(result["idlist"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default())
}

// ── efetch XML ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ArticleBuilder {
    pmid: String,
    title: String,
    paragraphs: Vec<String>,
    paragraph: Option<(Option<String>, String)>,
    authors: Vec<String>,
    last_name: String,
    fore_name: String,
    collective: String,
    journal: String,
    year: String,
    medline_date: String,
}

impl ArticleBuilder {
    fn push_text(&mut self, path: &[String], text: &str) {
        if ends_with(path, &["MedlineCitation", "PMID"]) {
            self.pmid.push_str(text);
        } else if within(path, "ArticleTitle") {
            self.title.push_str(text);
        } else if within(path, "AbstractText") {
            if let Some((_, body)) = self.paragraph.as_mut() {
                body.push_str(text);
            }
        } else if ends_with(path, &["Author", "LastName"]) {
            self.last_name.push_str(text);
        } else if ends_with(path, &["Author", "ForeName"]) {
            self.fore_name.push_str(text);
        } else if ends_with(path, &["Author", "CollectiveName"]) {
            self.collective.push_str(text);
        } else if ends_with(path, &["Journal", "Title"]) {
            self.journal.push_str(text);
        } else if ends_with(path, &["PubDate", "Year"]) {
            self.year.push_str(text);
        } else if ends_with(path, &["PubDate", "MedlineDate"]) {
            self.medline_date.push_str(text);
        }
    }

    fn close_paragraph(&mut self) {
        if let Some((label, body)) = self.paragraph.take() {
            let body = body.trim();
            if body.is_empty() {
                return;
            }
            self.paragraphs.push(match label {
                Some(label) => format!("{label}: {body}"),
                None => body.to_string(),
            });
        }
    }

    fn close_author(&mut self) {
        let name = format!("{} {}", self.last_name.trim(), self.fore_name.trim());
        let name = name.trim();
        if !name.is_empty() {
            self.authors.push(name.to_string());
        } else if !self.collective.trim().is_empty() {
            self.authors.push(self.collective.trim().to_string());
        }
        self.last_name.clear();
        self.fore_name.clear();
        self.collective.clear();
    }

    fn finish(self) -> Option<ArticleRecord> {
        let pmid = self.pmid.trim();
        if pmid.is_empty() {
            return None;
        }
        let mut record = ArticleRecord::new(pmid, self.title.trim());
        record.abstract_text = self.paragraphs.join("\n");
        record.journal = self.journal.trim().to_string();
        record.publication_year = match self.year.trim() {
            "" => self.medline_date.trim().chars().take(4).filter(char::is_ascii_digit).collect(),
            y => y.to_string(),
        };
        record.authors = self.authors;
        Some(record)
    }
}

fn ends_with(path: &[String], tail: &[&str]) -> bool {
    path.len() >= tail.len()
        && path[path.len() - tail.len()..].iter().zip(tail).all(|(a, b)| a == b)
}

fn within(path: &[String], name: &str) -> bool {
    path.iter().any(|p| p == name)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// `Label` wins over `NlmCategory`; blank values count as absent.
fn paragraph_label(e: &BytesStart<'_>) -> Option<String> {
    let mut label = None;
    let mut category = None;
    for attr in e.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else { continue };
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match attr.key.as_ref() {
            b"Label" => label = Some(value),
            b"NlmCategory" => category = Some(value),
            _ => {}
        }
    }
    label.or(category)
}

/// Parse efetch abstract-mode XML (`<PubmedArticleSet><PubmedArticle>...`).
/// Articles without a PMID are dropped.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<ArticleRecord>> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut path: Vec<String> = Vec::new();
    let mut current: Option<ArticleBuilder> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                match name.as_str() {
                    "PubmedArticle" => current = Some(ArticleBuilder::default()),
                    "AbstractText" if path.last().map(String::as_str) == Some("Abstract") => {
                        if let Some(b) = current.as_mut() {
                            b.paragraph = Some((paragraph_label(&e), String::new()));
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                if let Some(b) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| DigestError::Xml(format!("efetch XML text: {e}")))?;
                    b.push_text(&path, &text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(b) = current.as_mut() {
                    let raw = c.into_inner();
                    b.push_text(&path, &String::from_utf8_lossy(&raw));
                }
            }
            Ok(Event::End(_)) => {
                let name = path.pop();
                let Some(b) = current.as_mut() else { continue };
                match name.as_deref() {
                    Some("AbstractText") => b.close_paragraph(),
                    Some("Author") if path.last().map(String::as_str) == Some("AuthorList") => {
                        b.close_author()
                    }
                    Some("PubmedArticle") => match current.take().and_then(ArticleBuilder::finish) {
                        Some(record) => records.push(record),
                        None => warn!("Dropping PubmedArticle without PMID"),
                    },
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DigestError::Xml(format!(
                    "malformed efetch XML at byte {}: {e}",
                    reader.error_position()
                )))
            }
            _ => {}
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ARTICLES: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="Publisher" Owner="NLM">
      <PMID Version="1">38765432</PMID>
      <Article PubModel="Print-Electronic">
        <Journal>
          <JournalIssue CitedMedium="Internet">
            <PubDate><Year>2024</Year><Month>May</Month></PubDate>
          </JournalIssue>
          <Title>Critical care medicine</Title>
        </Journal>
        <ArticleTitle>Early <i>vasopressin</i> in septic shock &amp; AKI.</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND" NlmCategory="BACKGROUND">Septic shock is common.</AbstractText>
          <AbstractText Label="RESULTS" NlmCategory="RESULTS">Mortality fell.</AbstractText>
          <AbstractText NlmCategory="CONCLUSIONS">Use early.</AbstractText>
        </Abstract>
        <AuthorList CompleteYN="Y">
          <Author ValidYN="Y"><LastName>Tanaka</LastName><ForeName>Yuki</ForeName><Initials>Y</Initials></Author>
          <Author ValidYN="Y"><CollectiveName>SEPSIS-JP Group</CollectiveName></Author>
        </AuthorList>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections RefType="CommentOn"><PMID Version="1">11111111</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>38765433</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><MedlineDate>2023 Nov-Dec</MedlineDate></PubDate></JournalIssue>
          <Title>Shock</Title>
        </Journal>
        <ArticleTitle>Plain abstract</ArticleTitle>
        <Abstract><AbstractText>Single paragraph.</AbstractText></Abstract>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_structured_article() {
        let records = parse_pubmed_xml(TWO_ARTICLES).unwrap();
        assert_eq!(records.len(), 2);

        let a = &records[0];
        assert_eq!(a.pmid, "38765432");
        assert_eq!(a.title, "Early vasopressin in septic shock & AKI.");
        assert_eq!(
            a.abstract_text,
            "BACKGROUND: Septic shock is common.\nRESULTS: Mortality fell.\nCONCLUSIONS: Use early."
        );
        assert_eq!(a.authors, vec!["Tanaka Yuki", "SEPSIS-JP Group"]);
        assert_eq!(a.journal, "Critical care medicine");
        assert_eq!(a.publication_year, "2024");
        assert!(a.fetch_date.is_none());
    }

    #[test]
    fn test_medline_date_fallback_and_unlabelled_abstract() {
        let records = parse_pubmed_xml(TWO_ARTICLES).unwrap();
        let b = &records[1];
        assert_eq!(b.publication_year, "2023");
        assert_eq!(b.abstract_text, "Single paragraph.");
        assert!(b.authors.is_empty());
    }

    #[test]
    fn test_article_without_pmid_is_dropped() {
        let xml = r#"<PubmedArticleSet>
  <PubmedArticle><MedlineCitation><Article><ArticleTitle>No id</ArticleTitle></Article></MedlineCitation></PubmedArticle>
  <PubmedArticle><MedlineCitation><PMID>42</PMID><Article><ArticleTitle>Kept</ArticleTitle></Article></MedlineCitation></PubmedArticle>
</PubmedArticleSet>"#;
        let records = parse_pubmed_xml(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pmid, "42");
        assert_eq!(records[0].abstract_text, "");
    }

    #[test]
    fn test_malformed_xml_is_upstream_error() {
        let err = parse_pubmed_xml("<PubmedArticleSet><PubmedArticle></PubmedArticleSet>").unwrap_err();
        assert_eq!(err.kind(), "UpstreamRequestError");
    }

    #[test]
    fn test_empty_set() {
        assert!(parse_pubmed_xml("<PubmedArticleSet></PubmedArticleSet>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_esearch_ids() {
        let body = r#"{"header":{},"esearchresult":{"count":"2","retmax":"2","idlist":["38765432","38765433"]}}"#;
        assert_eq!(parse_esearch_ids(body).unwrap(), vec!["38765432", "38765433"]);

        let empty = r#"{"esearchresult":{"count":"0","idlist":[]}}"#;
        assert!(parse_esearch_ids(empty).unwrap().is_empty());
    }

    #[test]
    fn test_esearch_error_body() {
        let body = r#"{"esearchresult":{"ERROR":"Invalid query"}}"#;
        assert_eq!(parse_esearch_ids(body).unwrap_err().kind(), "UpstreamRequestError");
        assert!(parse_esearch_ids("<html>").is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let c = PubMedClient::new(None).unwrap().with_base_url("http://localhost:9000/eutils/");
        assert_eq!(c.base_url, "http://localhost:9000/eutils");
    }
}
