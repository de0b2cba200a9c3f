//! Explicitly constructed dependencies handed to every task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use pubdigest_common::{DigestError, Result};
use pubdigest_ingestion::{LiteratureSource, PubMedClient};
use pubdigest_llm::backend::{OpenAiBackend, OpenAiCompatibleBackend};
use pubdigest_llm::{LlmBackend, RetryPolicy, TokenEstimator};
use pubdigest_selection::SelectionPipeline;
use pubdigest_store::{FsObjectStore, MemoryObjectStore, ObjectStore, S3Credentials, S3ObjectStore};
use tracing::{info, warn};

use crate::config::{Config, StoreBackend};

/// Fallback when the configured model has no known tokenizer.
const DEFAULT_ESTIMATOR_MODEL: &str = "gpt-4";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Clone)]
pub struct TaskContext {
    pub literature: Arc<dyn LiteratureSource>,
    pub llm: Option<Arc<dyn LlmBackend>>,
    pub store: Arc<dyn ObjectStore>,
    pub estimator: TokenEstimator,
    pub settings: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}

impl TaskContext {
    /// Production wiring. Call [`Config::validate`] first.
    pub fn from_config(config: Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.request_timeout_secs);
        let llm = build_llm(&config, timeout)?;
        let estimator = build_estimator(&config)?;
        let store = build_store(&config)?;
        let literature: Arc<dyn LiteratureSource> = Arc::new(
            PubMedClient::new(config.fetch.api_key.clone())?.with_retmax(config.fetch.retmax),
        );

        info!(
            store = store.name(),
            model = llm.as_ref().map(|b| b.model_id()).unwrap_or("none"),
            estimator = estimator.encoding().name(),
            "Task context ready"
        );

        Ok(Self {
            literature,
            llm,
            store,
            estimator,
            settings: Arc::new(config),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn llm(&self) -> Result<Arc<dyn LlmBackend>> {
        self.llm
            .clone()
            .ok_or_else(|| DigestError::Config("no language model configured (OPENAI_API_KEY)".into()))
    }

    pub fn pipeline(&self, task: &str) -> Result<SelectionPipeline> {
        let llm = &self.settings.llm;
        let retry = RetryPolicy {
            max_attempts: llm.retry_attempts,
            delay: Duration::from_millis(llm.retry_delay_ms),
        };
        Ok(SelectionPipeline::new(self.llm()?, task).with_retry(retry))
    }

    pub fn bucket(&self) -> &str {
        self.settings.store.bucket_name()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// ISO-8601 timestamp for document metadata.
    pub fn timestamp(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

fn build_llm(config: &Config, timeout: Duration) -> Result<Option<Arc<dyn LlmBackend>>> {
    let llm = &config.llm;
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DigestError::Config(format!("cannot build HTTP client: {e}")))?;

    let backend: Option<Arc<dyn LlmBackend>> = match (&llm.base_url, &llm.api_key) {
        (Some(url), key) => Some(Arc::new(
            OpenAiCompatibleBackend::new(url.clone(), llm.model.clone(), key.clone()).with_client(client),
        )),
        (None, Some(key)) => Some(Arc::new(
            OpenAiBackend::new(key.clone(), llm.model.clone()).with_client(client),
        )),
        (None, None) => None,
    };
    Ok(backend)
}

fn build_estimator(config: &Config) -> Result<TokenEstimator> {
    let estimator = match TokenEstimator::for_model(&config.llm.model) {
        Ok(e) => e,
        Err(e) => {
            warn!(model = %config.llm.model, error = %e, fallback = DEFAULT_ESTIMATOR_MODEL, "Estimating tokens with the default model");
            TokenEstimator::for_model(DEFAULT_ESTIMATOR_MODEL)?
        }
    };
    match &config.llm.tokenizer_file {
        Some(path) => estimator.with_tokenizer_file(path),
        None => Ok(estimator),
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store = &config.store;
    Ok(match store.backend {
        StoreBackend::S3 => {
            let bucket = store
                .bucket
                .clone()
                .ok_or_else(|| DigestError::Config("BUCKET_NAME is not set".into()))?;
            Arc::new(
                S3ObjectStore::new(bucket, store.region.clone(), S3Credentials::from_env()?)
                    .with_endpoint(store.endpoint_url.clone()),
            )
        }
        StoreBackend::Fs => {
            let root = store
                .root
                .clone()
                .ok_or_else(|| DigestError::Config("store.root is not set".into()))?;
            Arc::new(FsObjectStore::new(root))
        }
        StoreBackend::Memory => Arc::new(MemoryObjectStore::new()),
    })
}
