//! End-to-end task flows over in-memory collaborators.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pubdigest_agent::config::Config;
use pubdigest_agent::context::{FixedClock, TaskContext};
use pubdigest_agent::envelope::ObjectRef;
use pubdigest_agent::tasks::{
    analyze, build_default_registry, daily, fetch, run_task, translate, weekly_critical, weekly_evidence,
};
use pubdigest_common::models::{AnalysisDocument, AnalysisMetadata, WeeklyCriticalDocument};
use pubdigest_common::{ArticleRecord, SelectedArticle};
use pubdigest_ingestion::StaticSource;
use pubdigest_llm::mock::ScriptedBackend;
use pubdigest_llm::{LlmBackend, TokenEstimator};
use pubdigest_store::{read_json, write_json, MemoryObjectStore, ObjectStore};
use serde_json::{json, Value};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 8, 6, 0, 0).unwrap()
}

fn day(m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, m, d, 12, 0, 0).unwrap()
}

fn settings() -> Config {
    let mut c = Config::default();
    c.llm.retry_attempts = 1;
    c.llm.retry_delay_ms = 0;
    c
}

fn records() -> Vec<ArticleRecord> {
    let mut a = ArticleRecord::new("111", "Early vasopressin in septic shock");
    a.abstract_text = "A randomized trial of 600 patients.".into();
    a.journal = "NEJM".into();
    a.publication_year = "2024".into();
    let mut b = ArticleRecord::new("222", "Lactate clearance in sepsis");
    b.abstract_text = "An observational cohort.".into();
    b.journal = "Critical Care".into();
    b.publication_year = "2024".into();
    vec![a, b]
}

struct Harness {
    ctx: TaskContext,
    store: Arc<MemoryObjectStore>,
    backend: Arc<ScriptedBackend>,
}

fn harness(source: StaticSource, backend: ScriptedBackend) -> Harness {
    let store = Arc::new(MemoryObjectStore::new());
    let backend = Arc::new(backend);
    let llm: Arc<dyn LlmBackend> = backend.clone();
    let ctx = TaskContext {
        literature: Arc::new(source),
        llm: Some(llm),
        store: store.clone(),
        estimator: TokenEstimator::for_model("gpt-4").unwrap(),
        settings: Arc::new(settings()),
        clock: Arc::new(FixedClock(now())),
    };
    Harness { ctx, store, backend }
}

fn analysis_doc(term: &str, items: Vec<SelectedArticle>) -> Vec<u8> {
    let doc = AnalysisDocument {
        metadata: AnalysisMetadata {
            original_file: format!("s3://local/pubmed_{term}.json"),
            analysis_date: "2024-05-06T00:00:00Z".into(),
            search_term: term.into(),
            total_analyzed: 10,
            total_selected: items.len(),
        },
        impactful_articles: items,
    };
    serde_json::to_vec(&doc).unwrap()
}

async fn seed_week(store: &MemoryObjectStore) {
    store
        .insert_with_mtime(
            "pubmed_sepsis_20240506_analysis.json",
            analysis_doc(
                "sepsis",
                vec![
                    SelectedArticle::new("111").with_field("journal", "NEJM"),
                    SelectedArticle::new("222").with_field("journal", "Lancet"),
                ],
            ),
            day(5, 6),
        )
        .await;
    store
        .insert_with_mtime(
            "pubmed_sepsis_20240506_jp_analysis.json",
            analysis_doc("sepsis", vec![SelectedArticle::new("999")]),
            day(5, 6),
        )
        .await;
    store
        .insert_with_mtime(
            "pubmed_sepsis_20240320_analysis.json",
            analysis_doc("sepsis", vec![SelectedArticle::new("333")]),
            day(3, 20),
        )
        .await;
    store
        .insert_with_mtime(
            "pubmed_ards_20240507_analysis.json",
            analysis_doc("ards", vec![SelectedArticle::new("444").with_field("journal", "JAMA")]),
            day(5, 7),
        )
        .await;
}

// ── fetch ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_contains_failing_topic() {
    let h = harness(StaticSource::new(records()).failing_term("ards"), ScriptedBackend::new("gpt-4"));
    let terms = vec!["sepsis".to_string(), "ards".to_string()];
    let summary = fetch::run(&h.ctx, &terms).await.unwrap();

    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].file_name, "pubmed_sepsis_20240508.json");
    assert_eq!(summary.results[0].articles_count, 2);
    assert_eq!(summary.failed_terms.len(), 1);
    assert_eq!(summary.failed_terms[0].search_term, "ards");
    assert_eq!(summary.failed_terms[0].error, "UpstreamRequestError");
    assert_eq!(summary.message, "Successfully processed 1 search terms and stored the results.");

    let stored: Value = read_json(h.store.as_ref(), "pubmed_sepsis_20240508.json").await.unwrap();
    assert_eq!(stored["metadata"]["total_articles"], 2);
    assert_eq!(stored["metadata"]["date_range"]["from"], "2024-05-07");
    assert_eq!(stored["articles"]["111"]["journal"], "NEJM");
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_fetch_with_no_matches_writes_nothing() {
    let h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4"));
    let summary = fetch::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();
    assert!(summary.results.is_empty());
    assert_eq!(summary.message, "No new articles found for any search terms.");
    assert!(h.store.keys().await.is_empty());
}

// ── analyze ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_analyze_writes_selection() {
    let backend = ScriptedBackend::new("gpt-4").reply(
        r#"Here you go:
```json
[{"pmid": "111", "title": "Early vasopressin in septic shock", "impact_reason": "Practice-changing RCT"}]
```"#,
    );
    let h = harness(StaticSource::new(records()), backend);
    fetch::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();

    let summary = analyze::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508.json")).await.unwrap();
    assert_eq!(summary.articles_analyzed, 2);
    assert_eq!(summary.articles_selected, 1);
    assert_eq!(summary.chunks_failed, 0);
    assert_eq!(summary.output_key.as_deref(), Some("pubmed_sepsis_20240508_analysis.json"));

    let doc: AnalysisDocument = read_json(h.store.as_ref(), "pubmed_sepsis_20240508_analysis.json").await.unwrap();
    assert_eq!(doc.metadata.original_file, "s3://local/pubmed_sepsis_20240508.json");
    assert_eq!(doc.metadata.search_term, "sepsis");
    assert_eq!(doc.metadata.total_analyzed, 2);
    assert_eq!(doc.metadata.total_selected, 1);
    assert_eq!(doc.metadata.analysis_date, "2024-05-08T06:00:00Z");
    assert_eq!(doc.impactful_articles[0].pmid, "111");
    assert_eq!(doc.impactful_articles[0].field_str("impact_reason"), Some("Practice-changing RCT"));
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test]
async fn test_analyze_empty_selection_writes_nothing() {
    let h = harness(StaticSource::new(records()), ScriptedBackend::new("gpt-4").reply("[]"));
    fetch::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();

    let summary = analyze::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508.json")).await.unwrap();
    assert_eq!(summary.articles_selected, 0);
    assert_eq!(summary.output_key, None);
    assert_eq!(summary.message.as_deref(), Some("No impactful articles selected"));
    assert_eq!(h.store.keys().await, vec!["pubmed_sepsis_20240508.json"]);
}

#[tokio::test]
async fn test_analyze_rejects_non_fetch_key() {
    let h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4"));
    let registry = Arc::new(build_default_registry());
    let out = run_task(
        registry.clone(),
        "analyze",
        h.ctx.clone(),
        json!({ "bucket": "local", "key": "weekly_critical_20240508.json" }),
    )
    .await;
    assert_eq!(out["statusCode"], 400);
    assert_eq!(out["error"], "InvalidInputError");

    let out = run_task(registry, "analyze", h.ctx, json!({ "bucket": "other", "key": "pubmed_x_20240508.json" })).await;
    assert_eq!(out["statusCode"], 400);
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_analyze_from_storage_notification() {
    let backend = ScriptedBackend::new("gpt-4").reply(r#"[{"pmid": 222}]"#);
    let h = harness(StaticSource::new(records()), backend);
    fetch::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();

    let event = json!({ "Records": [{
        "eventSource": "aws:s3",
        "s3": { "bucket": { "name": "local" }, "object": { "key": "pubmed_sepsis_20240508.json" } }
    }]});
    let out = run_task(Arc::new(build_default_registry()), "analyze", h.ctx, event).await;
    assert_eq!(out["statusCode"], 200);
    assert_eq!(out["articles_selected"], 1);
    assert_eq!(out["output_key"], "pubmed_sepsis_20240508_analysis.json");
}

#[tokio::test]
async fn test_analyze_drops_pmids_the_model_invented() {
    let backend = ScriptedBackend::new("gpt-4").reply(r#"[{"pmid": "99999999", "impact_reason": "not fetched"}]"#);
    let h = harness(StaticSource::new(records()), backend);
    fetch::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();

    let summary = analyze::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508.json")).await.unwrap();
    assert_eq!(summary.articles_selected, 0);
    assert_eq!(summary.output_key, None);
    assert!(!h.store.keys().await.iter().any(|k| k.ends_with("_analysis.json")));
}

#[tokio::test]
async fn test_missing_model_aborts_before_reading_the_store() {
    let mut h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4"));
    h.ctx.llm = None;

    // none of these objects exist: only the configuration check can fail first
    let err = analyze::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508.json")).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
    let err = translate::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508_analysis.json")).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
    let err = weekly_critical::run(&h.ctx, None).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
    let err = weekly_evidence::run(&h.ctx, None).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
}

// ── translate ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_translate_preserves_identifiers() {
    let translated = json!({
        "metadata": { "search_term": "敗血症" },
        "impactful_articles": [{ "pmid": "１１１", "journal": "ニューイングランド", "title": "敗血症性ショックにおける早期バソプレシン" }]
    });
    let h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4").reply(translated.to_string()));
    let source = AnalysisDocument {
        metadata: AnalysisMetadata {
            original_file: "s3://local/pubmed_sepsis_20240508.json".into(),
            analysis_date: "2024-05-08T06:00:00Z".into(),
            search_term: "sepsis".into(),
            total_analyzed: 2,
            total_selected: 1,
        },
        impactful_articles: vec![SelectedArticle::new("111")
            .with_field("journal", "NEJM")
            .with_field("publication_year", "2024")],
    };
    write_json(h.store.as_ref(), "pubmed_sepsis_20240508_analysis.json", &source).await.unwrap();

    let summary = translate::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508_analysis.json")).await.unwrap();
    assert_eq!(summary.output_key, "pubmed_sepsis_20240508_jp_analysis.json");
    assert_eq!(summary.message, "Translation completed successfully");

    let out: Value = read_json(h.store.as_ref(), &summary.output_key).await.unwrap();
    let item = &out["impactful_articles"][0];
    assert_eq!(item["pmid"], "111");
    assert_eq!(item["journal"], "NEJM");
    assert_eq!(item["publication_year"], "2024");
    assert_eq!(item["title"], "敗血症性ショックにおける早期バソプレシン");
    assert_eq!(out["metadata"]["target_language"], "ja");
    assert_eq!(out["metadata"]["original_language"], "en");
    assert_eq!(out["metadata"]["translation_date"], "2024-05-08T06:00:00Z");
}

#[tokio::test]
async fn test_translate_joins_reordered_answer_by_pmid() {
    let translated = json!({
        "impactful_articles": [
            { "pmid": "222", "journal": "クリティカルケア", "summary": "B-ja" },
            { "pmid": "111", "summary": "A-ja" }
        ]
    });
    let h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4").reply(translated.to_string()));
    let source = analysis_doc(
        "sepsis",
        vec![
            SelectedArticle::new("111").with_field("journal", "NEJM").with_field("summary", "A"),
            SelectedArticle::new("222").with_field("journal", "Critical Care").with_field("summary", "B"),
        ],
    );
    h.store.put("pubmed_sepsis_20240508_analysis.json", source, "application/json").await.unwrap();

    let summary = translate::run(&h.ctx, &ObjectRef::new("pubmed_sepsis_20240508_analysis.json")).await.unwrap();
    let out: Value = read_json(h.store.as_ref(), &summary.output_key).await.unwrap();
    let items = out["impactful_articles"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    for item in items {
        match item["pmid"].as_str() {
            Some("111") => {
                assert_eq!(item["journal"], "NEJM");
                assert_eq!(item["summary"], "A-ja");
            }
            Some("222") => {
                assert_eq!(item["journal"], "Critical Care");
                assert_eq!(item["summary"], "B-ja");
            }
            other => panic!("unexpected pmid {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_translate_accepts_output_key_event() {
    let h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4"));
    let out = run_task(
        Arc::new(build_default_registry()),
        "translate",
        h.ctx,
        json!({ "output_key": "pubmed_sepsis_20240508.json" }),
    )
    .await;
    // a fetch document is not translatable
    assert_eq!(out["statusCode"], 400);
}

// ── weekly rollups ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_weekly_critical_uses_recent_analyses_only() {
    let backend = ScriptedBackend::new("gpt-4")
        .reply(r#"[{"pmid": "111", "importance_reason": "RCT"}, {"pmid": "444", "importance_reason": "Large cohort"}]"#)
        .reply(r#"[{"pmid": "444", "selection_reason": "Most actionable"}, {"pmid": "555"}]"#);
    let h = harness(StaticSource::new(Vec::new()), backend);
    seed_week(&h.store).await;

    let summary = weekly_critical::run(&h.ctx, None).await.unwrap();
    assert_eq!(summary.message, "Weekly critical articles analysis completed successfully");
    assert_eq!(summary.search_term, "all");
    assert_eq!(summary.articles_selected, 1);
    assert_eq!(summary.output_file.as_deref(), Some("weekly_critical_20240508.json"));
    assert_eq!(h.backend.call_count(), 2);

    let doc: WeeklyCriticalDocument = read_json(h.store.as_ref(), "weekly_critical_20240508.json").await.unwrap();
    assert_eq!(doc.metadata.files_analyzed, 2);
    assert_eq!(doc.metadata.total_articles_reviewed, 3);
    assert_eq!(doc.metadata.period_start, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    assert_eq!(doc.metadata.period_end, NaiveDate::from_ymd_opt(2024, 5, 8).unwrap());
    assert_eq!(doc.metadata.report_type, "weekly_critical_articles");
    assert_eq!(doc.weekly_highlights.top_journals, vec!["JAMA"]);
    assert_eq!(doc.weekly_highlights.summary, "今週は3件の論文から最も重要な1件を厳選しました。");

    let pick = &doc.critical_articles[0];
    assert_eq!(pick.pmid, "444");
    assert_eq!(pick.field_str("selection_reason"), Some("Most actionable"));
    assert_eq!(pick.field_str("importance_reason"), Some("Large cohort"));
    assert_eq!(pick.field_str("source_file"), Some("pubmed_ards_20240507_analysis.json"));

    // the translated and the stale documents never reach the model
    let prompts: String = h.backend.requests().iter().map(|r| r.prompt_text()).collect();
    assert!(!prompts.contains("999"));
    assert!(!prompts.contains("333"));
}

#[tokio::test]
async fn test_weekly_critical_topic_filter() {
    let backend = ScriptedBackend::new("gpt-4").reply(r#"[{"pmid": "222"}]"#).reply(r#"[{"pmid": "222"}]"#);
    let h = harness(StaticSource::new(Vec::new()), backend);
    seed_week(&h.store).await;

    let summary = weekly_critical::run(&h.ctx, Some("Sepsis")).await.unwrap();
    assert_eq!(summary.output_file.as_deref(), Some("weekly_critical_sepsis_20240508.json"));
    let doc: WeeklyCriticalDocument = read_json(h.store.as_ref(), "weekly_critical_sepsis_20240508.json").await.unwrap();
    assert_eq!(doc.metadata.files_analyzed, 1);
    assert_eq!(doc.metadata.search_term, "Sepsis");
    assert_eq!(doc.weekly_highlights.top_journals, vec!["Lancet"]);
}

#[tokio::test]
async fn test_weekly_critical_highlights_follow_report_language() {
    let backend = ScriptedBackend::new("gpt-4").reply(r#"[{"pmid": "222"}]"#).reply(r#"[{"pmid": "222"}]"#);
    let mut h = harness(StaticSource::new(Vec::new()), backend);
    let mut english = settings();
    english.weekly.report_language = "English".into();
    h.ctx.settings = Arc::new(english);
    seed_week(&h.store).await;

    weekly_critical::run(&h.ctx, Some("sepsis")).await.unwrap();
    let doc: WeeklyCriticalDocument = read_json(h.store.as_ref(), "weekly_critical_sepsis_20240508.json").await.unwrap();
    assert_eq!(doc.weekly_highlights.summary, "This week the 1 most important of 2 reviewed articles were selected.");
    assert!(doc.weekly_highlights.selection_rationale.starts_with("Selected for immediate impact"));
}

#[tokio::test]
async fn test_weekly_critical_without_files_skips_model() {
    let h = harness(StaticSource::new(Vec::new()), ScriptedBackend::new("gpt-4"));
    let summary = weekly_critical::run(&h.ctx, None).await.unwrap();
    assert_eq!(summary.message, "No files to process");
    assert_eq!(summary.output_file, None);
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_weekly_evidence_without_evidence_writes_nothing() {
    let backend = ScriptedBackend::new("gpt-4").reply(r#"{"CQ4-1": [], "CQ4-2": [], "CQ4-3": [], "CQ4-4": []}"#);
    let h = harness(StaticSource::new(Vec::new()), backend);
    seed_week(&h.store).await;

    let summary = weekly_evidence::run(&h.ctx, None).await.unwrap();
    assert_eq!(summary.message, "No evidence articles found");
    assert_eq!(summary.output_file, None);
    assert_eq!(summary.articles_analyzed, 3);
    assert!(!h.store.keys().await.iter().any(|k| k.starts_with("weekly_evidence")));
}

#[tokio::test]
async fn test_weekly_evidence_maps_questions() {
    let backend = ScriptedBackend::new("gpt-4").reply(
        r#"{"CQ4-1": [{"pmid": "111", "evidence_value": "PMX-DHP RCT"}], "CQ4-2": [], "CQ9-9": [{"pmid": "222"}]}"#,
    );
    let h = harness(StaticSource::new(Vec::new()), backend);
    seed_week(&h.store).await;

    let summary = weekly_evidence::run(&h.ctx, None).await.unwrap();
    assert_eq!(summary.output_file.as_deref(), Some("weekly_evidence_20240508.json"));
    assert_eq!(summary.evidence_entries, 1);

    let doc: Value = read_json(h.store.as_ref(), "weekly_evidence_20240508.json").await.unwrap();
    let evidence = doc["evidence_articles"].as_object().unwrap();
    assert_eq!(evidence.keys().collect::<Vec<_>>(), vec!["CQ4-1", "CQ4-2", "CQ4-3", "CQ4-4"]);
    assert_eq!(evidence["CQ4-1"][0]["pmid"], "111");
    assert_eq!(evidence["CQ4-2"], json!([]));
    assert_eq!(doc["metadata"]["files_analyzed"], 2);
}

// ── daily chain ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_daily_chain_fetches_analyzes_translates() {
    let translated = json!({ "impactful_articles": [{ "pmid": "111", "title": "早期バソプレシン" }] });
    let backend = ScriptedBackend::new("gpt-4").reply(r#"[{"pmid": "111"}]"#).reply(translated.to_string());
    let h = harness(StaticSource::new(records()), backend);

    let summary = daily::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();
    assert_eq!(summary.steps.len(), 1);
    let step = &summary.steps[0];
    assert_eq!(step.fetch_key, "pubmed_sepsis_20240508.json");
    assert_eq!(step.analysis_key.as_deref(), Some("pubmed_sepsis_20240508_analysis.json"));
    assert_eq!(step.translation_key.as_deref(), Some("pubmed_sepsis_20240508_jp_analysis.json"));
    assert_eq!(step.articles_selected, 1);
    assert!(step.error.is_none());

    let mut keys = h.store.keys().await;
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "pubmed_sepsis_20240508.json",
            "pubmed_sepsis_20240508_analysis.json",
            "pubmed_sepsis_20240508_jp_analysis.json",
        ]
    );
}

#[tokio::test]
async fn test_daily_chain_records_translate_failure() {
    let backend = ScriptedBackend::new("gpt-4").reply(r#"[{"pmid": "111"}]"#).fail("upstream 503");
    let h = harness(StaticSource::new(records()), backend);

    let summary = daily::run(&h.ctx, &["sepsis".to_string()]).await.unwrap();
    let step = &summary.steps[0];
    assert_eq!(step.analysis_key.as_deref(), Some("pubmed_sepsis_20240508_analysis.json"));
    assert_eq!(step.translation_key, None);
    assert_eq!(step.error.as_ref().map(|e| e.step), Some("translate"));
    assert!(h.store.get("pubmed_sepsis_20240508_analysis.json").await.is_ok());
}
