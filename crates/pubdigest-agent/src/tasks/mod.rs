//! Task registration for pubdigest.
//!
//! Each pipeline stage is a `DigestTask` registered in a central `TaskRegistry`.
//! The scheduler (or the CLI) invokes tasks by name with a JSON event; the
//! response is always a JSON object carrying `statusCode`.
//!
//! Task lifecycle:
//!   1. Implement `DigestTask` for your type.
//!   2. Register with `TaskRegistry::register`.
//!   3. Invoke through `run_task(registry, name, ctx, event)`.

pub mod analyze;
pub mod daily;
pub mod fetch;
mod rollup;
pub mod translate;
pub mod weekly_critical;
pub mod weekly_evidence;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use pubdigest_common::{DigestError, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::context::TaskContext;

// ─────────────────────────────────────────────
//  Core trait
// ─────────────────────────────────────────────

#[async_trait]
pub trait DigestTask: Send + Sync {
    /// Unique task name, as typed on the command line (kebab-case).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the task calls the language model. Checked during config validation.
    fn needs_model(&self) -> bool {
        true
    }

    /// Run the task. The returned object becomes the response body.
    async fn invoke(&self, ctx: &TaskContext, event: Value) -> Result<Value>;
}

// ─────────────────────────────────────────────
//  Task registry
// ─────────────────────────────────────────────

pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<dyn DigestTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: BTreeMap::new() }
    }

    /// Register a task. Panics if the name is already registered.
    pub fn register<T: DigestTask + 'static>(&mut self, task: T) {
        let name = task.name().to_string();
        assert!(!self.tasks.contains_key(&name), "Duplicate task name: {name}");
        self.tasks.insert(name, Arc::new(task));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DigestTask>> {
        self.tasks.get(name)
    }

    pub async fn invoke(&self, name: &str, ctx: &TaskContext, event: Value) -> Result<Value> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| DigestError::InvalidInput(format!("Unknown task: {name}")))?;
        task.invoke(ctx, event).await
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn manifest(&self) -> Value {
        let tasks: Vec<Value> = self
            .tasks
            .values()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "needs_model": t.needs_model(),
                })
            })
            .collect();
        json!({ "tasks": tasks })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_default_registry() -> TaskRegistry {
    let mut reg = TaskRegistry::new();
    reg.register(fetch::FetchTask);
    reg.register(analyze::AnalyzeTask);
    reg.register(translate::TranslateTask);
    reg.register(weekly_critical::WeeklyCriticalTask);
    reg.register(weekly_evidence::WeeklyEvidenceTask);
    reg.register(daily::DailyTask);
    tracing::debug!("TaskRegistry ready with {} tasks", reg.len());
    reg
}

// ─────────────────────────────────────────────
//  Invocation surface
// ─────────────────────────────────────────────

/// Run `name` on its own tokio task and shape the response. Errors and
/// panics become a `statusCode` 4xx/5xx object; this never fails.
pub async fn run_task(registry: Arc<TaskRegistry>, name: &str, ctx: TaskContext, event: Value) -> Value {
    let run_id = Uuid::new_v4();
    let span = info_span!("task", task = name, run_id = %run_id);
    let owned_name = name.to_string();

    let handle = tokio::spawn(
        async move { registry.invoke(&owned_name, &ctx, event).await }.instrument(span.clone()),
    );

    async move {
        match handle.await {
            Ok(Ok(summary)) => {
                info!("Task completed");
                success(summary)
            }
            Ok(Err(e)) => {
                error!(kind = e.kind(), error = %e, "Task failed");
                failure(e.status_code(), e.kind(), &e.to_string())
            }
            Err(join) => {
                error!(error = %join, "Task aborted");
                failure(500, "UnhandledError", &join.to_string())
            }
        }
    }
    .instrument(span)
    .await
}

fn success(summary: Value) -> Value {
    let mut body = Map::new();
    body.insert("statusCode".into(), json!(200));
    match summary {
        Value::Object(fields) => body.extend(fields),
        Value::Null => {}
        other => {
            body.insert("body".into(), other);
        }
    }
    Value::Object(body)
}

fn failure(status: u16, kind: &str, message: &str) -> Value {
    json!({ "statusCode": status, "error": kind, "message": message })
}

/// Serialize a typed summary into the response body.
pub(crate) fn to_body<T: Serialize>(summary: &T) -> Result<Value> {
    Ok(serde_json::to_value(summary)?)
}

// ─────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::SystemClock;
    use pubdigest_ingestion::StaticSource;
    use pubdigest_llm::TokenEstimator;
    use pubdigest_store::MemoryObjectStore;

    struct EchoTask;

    #[async_trait]
    impl DigestTask for EchoTask {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes the event back." }
        fn needs_model(&self) -> bool { false }
        async fn invoke(&self, _ctx: &TaskContext, event: Value) -> Result<Value> {
            match event["fail"].as_str() {
                Some("input") => Err(DigestError::InvalidInput("bad".into())),
                Some("storage") => Err(DigestError::Storage("lost".into())),
                Some("panic") => panic!("boom"),
                _ => Ok(json!({ "echo": event["message"] })),
            }
        }
    }

    fn ctx() -> TaskContext {
        TaskContext {
            literature: Arc::new(StaticSource::new(Vec::new())),
            llm: None,
            store: Arc::new(MemoryObjectStore::new()),
            estimator: TokenEstimator::for_model("gpt-4").unwrap(),
            settings: Arc::new(Config::default()),
            clock: Arc::new(SystemClock),
        }
    }

    fn registry() -> Arc<TaskRegistry> {
        let mut reg = TaskRegistry::new();
        reg.register(EchoTask);
        Arc::new(reg)
    }

    #[tokio::test]
    async fn test_success_puts_status_first() {
        let out = run_task(registry(), "echo", ctx(), json!({ "message": "hi" })).await;
        assert_eq!(out, json!({ "statusCode": 200, "echo": "hi" }));
        assert_eq!(out.as_object().unwrap().keys().next().unwrap(), "statusCode");
    }

    #[tokio::test]
    async fn test_error_kinds_map_to_status() {
        let out = run_task(registry(), "echo", ctx(), json!({ "fail": "input" })).await;
        assert_eq!(out["statusCode"], 400);
        assert_eq!(out["error"], "InvalidInputError");

        let out = run_task(registry(), "echo", ctx(), json!({ "fail": "storage" })).await;
        assert_eq!(out["statusCode"], 500);
        assert_eq!(out["error"], "StorageError");
        assert!(out["message"].as_str().unwrap().contains("lost"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let out = run_task(registry(), "echo", ctx(), json!({ "fail": "panic" })).await;
        assert_eq!(out["statusCode"], 500);
        assert_eq!(out["error"], "UnhandledError");
    }

    #[tokio::test]
    async fn test_unknown_task_is_400() {
        let out = run_task(registry(), "nope", ctx(), json!({})).await;
        assert_eq!(out["statusCode"], 400);
        assert!(out["message"].as_str().unwrap().contains("Unknown task"));
    }

    #[test]
    fn test_default_registry_names() {
        let reg = build_default_registry();
        assert_eq!(
            reg.names(),
            vec!["analyze", "daily", "fetch", "translate", "weekly-critical", "weekly-evidence"]
        );
        assert!(!reg.get("fetch").unwrap().needs_model());
        assert!(reg.get("analyze").unwrap().needs_model());
        assert_eq!(reg.manifest()["tasks"].as_array().unwrap().len(), 6);
    }

    #[test]
    #[should_panic(expected = "Duplicate task name")]
    fn test_duplicate_registration_panics() {
        let mut reg = TaskRegistry::new();
        reg.register(EchoTask);
        reg.register(EchoTask);
    }
}
