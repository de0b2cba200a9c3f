//! Configuration loading for pubdigest.
//! Reads pubdigest.toml from the current directory or the path in PUBDIGEST_CONFIG,
//! then applies environment overrides. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use pubdigest_common::{default_clinical_questions, ClinicalQuestion, DigestError, Result};
use secrecy::SecretString;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub analyze: AnalyzeConfig,
    #[serde(default)]
    pub weekly: WeeklyConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Selects the OpenAI-compatible backend when set.
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    #[serde(default = "default_impact_temperature")]
    pub impact_temperature: f32,
    #[serde(default = "default_rollup_temperature")]
    pub rollup_temperature: f32,
    #[serde(default = "default_impact_max_tokens")]
    pub impact_max_tokens: u32,
    #[serde(default = "default_impact_final_max_tokens")]
    pub impact_final_max_tokens: u32,
    #[serde(default = "default_2000")]
    pub weekly_max_tokens: u32,
    #[serde(default = "default_weekly_final_max_tokens")]
    pub weekly_final_max_tokens: u32,
    #[serde(default = "default_2000")]
    pub evidence_max_tokens: u32,
    #[serde(default = "default_2000")]
    pub translate_max_tokens: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Hugging Face `tokenizer.json` for exact token counts.
    pub tokenizer_file: Option<PathBuf>,
}

fn default_model()                   -> String { "gpt-4".to_string() }
fn default_impact_temperature()      -> f32 { 0.2 }
fn default_rollup_temperature()      -> f32 { 0.1 }
fn default_impact_max_tokens()       -> u32 { 1000 }
fn default_impact_final_max_tokens() -> u32 { 1500 }
fn default_2000()                    -> u32 { 2000 }
fn default_weekly_final_max_tokens() -> u32 { 3000 }
fn default_retry_attempts()          -> u32 { 3 }
fn default_retry_delay_ms()          -> u64 { 500 }
fn default_request_timeout_secs()    -> u64 { 120 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key: None,
            impact_temperature: default_impact_temperature(),
            rollup_temperature: default_rollup_temperature(),
            impact_max_tokens: default_impact_max_tokens(),
            impact_final_max_tokens: default_impact_final_max_tokens(),
            weekly_max_tokens: default_2000(),
            weekly_final_max_tokens: default_weekly_final_max_tokens(),
            evidence_max_tokens: default_2000(),
            translate_max_tokens: default_2000(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            tokenizer_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

fn default_chunk_tokens() -> usize { 4000 }

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: default_chunk_tokens() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_search_terms")]
    pub search_terms: Vec<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_retmax")]
    pub retmax: usize,
    /// NCBI API key; raises the E-utilities rate limit.
    pub api_key: Option<SecretString>,
    /// Append `_HHMMSS` to fetch keys so reruns on one day do not overwrite.
    #[serde(default)]
    pub timestamped_keys: bool,
}

fn default_search_terms()  -> Vec<String> { vec!["sepsis".to_string()] }
fn default_lookback_days() -> u32 { 1 }
fn default_retmax()        -> usize { 1000 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            search_terms: default_search_terms(),
            lookback_days: default_lookback_days(),
            retmax: default_retmax(),
            api_key: None,
            timestamped_keys: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeConfig {
    #[serde(default = "default_max_selected")]
    pub max_selected: usize,
}

fn default_max_selected() -> usize { 3 }

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self { max_selected: default_max_selected() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeeklyConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_max_selected")]
    pub max_selected: usize,
    #[serde(default = "default_language")]
    pub report_language: String,
}

fn default_window_days() -> u32 { 7 }
fn default_language()    -> String { "Japanese".to_string() }

impl Default for WeeklyConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            max_selected: default_max_selected(),
            report_language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceConfig {
    #[serde(default = "default_max_per_question")]
    pub max_per_question: usize,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_language")]
    pub report_language: String,
    #[serde(default = "default_clinical_questions")]
    pub questions: Vec<ClinicalQuestion>,
}

fn default_max_per_question() -> usize { 10 }

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_per_question: default_max_per_question(),
            window_days: default_window_days(),
            report_language: default_language(),
            questions: default_clinical_questions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateConfig {
    #[serde(default = "default_language")]
    pub target_language: String,
    /// Recorded as `metadata.target_language`.
    #[serde(default = "default_language_code")]
    pub target_language_code: String,
}

fn default_language_code() -> String { "ja".to_string() }

impl Default for TranslateConfig {
    fn default() -> Self {
        Self { target_language: default_language(), target_language_code: default_language_code() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Fs,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StoreBackend::S3),
            "fs" | "file" | "local" => Ok(StoreBackend::Fs),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(DigestError::Config(format!("unknown store backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    pub bucket: Option<String>,
    /// Directory standing in for the bucket with the `fs` backend.
    pub root: Option<PathBuf>,
    #[serde(default = "default_region")]
    pub region: String,
    /// MinIO / LocalStack endpoint; switches to path-style addressing.
    pub endpoint_url: Option<String>,
}

fn default_region() -> String { "us-east-1".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            bucket: None,
            root: None,
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl StoreConfig {
    /// Bucket name reported in task summaries.
    pub fn bucket_name(&self) -> &str {
        self.bucket.as_deref().unwrap_or("local")
    }
}


impl Config {
    /// Load `.env`, the TOML file and the process environment, in that order.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// As [`Config::load`], with an explicit file taking precedence over
    /// PUBDIGEST_CONFIG.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => std::env::var("PUBDIGEST_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("pubdigest.toml")),
        };
        let mut config = Self::from_file(&path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DigestError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DigestError::Config(format!("invalid config: {e}")))
    }

    /// Environment variable names understood by the deployed service. Empty values are ignored.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("OPENAI_API_KEY")   { self.llm.api_key = Some(SecretString::from(v)); }
        if let Some(v) = var("GPT_MODEL")        { self.llm.model = v; }
        if let Some(v) = var("OPENAI_BASE_URL")  { self.llm.base_url = Some(v); }
        if let Some(v) = var("NCBI_API_KEY")     { self.fetch.api_key = Some(SecretString::from(v)); }
        if let Some(v) = var("BUCKET_NAME")      { self.store.bucket = Some(v); }
        if let Some(v) = var("PUBDIGEST_STORE")  { self.store.backend = v.parse()?; }
        if let Some(v) = var("PUBDIGEST_STORE_ROOT") { self.store.root = Some(PathBuf::from(v)); }
        if let Some(v) = var("AWS_REGION")       { self.store.region = v; }
        if let Some(v) = var("AWS_ENDPOINT_URL") { self.store.endpoint_url = Some(v); }
        if let Some(v) = var("SEARCH_TERMS") {
            self.fetch.search_terms = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    /// Checked once before any network call.
    pub fn validate(&self, needs_model: bool) -> Result<()> {
        match self.store.backend {
            StoreBackend::S3 if self.store.bucket.is_none() => {
                return Err(DigestError::Config("BUCKET_NAME is not set".into()));
            }
            StoreBackend::Fs if self.store.root.is_none() => {
                return Err(DigestError::Config(
                    "the fs store needs store.root or PUBDIGEST_STORE_ROOT".into(),
                ));
            }
            _ => {}
        }
        if needs_model && self.llm.api_key.is_none() && self.llm.base_url.is_none() {
            return Err(DigestError::Config("OPENAI_API_KEY is not set".into()));
        }
        if self.fetch.search_terms.is_empty() {
            return Err(DigestError::Config("no search terms configured".into()));
        }
        if self.chunking.max_tokens == 0 {
            return Err(DigestError::Config("chunking.max_tokens must be positive".into()));
        }
        if self.analyze.max_selected == 0 || self.weekly.max_selected == 0 {
            return Err(DigestError::Config("max_selected must be positive".into()));
        }
        if self.evidence.questions.is_empty() {
            return Err(DigestError::Config("evidence.questions is empty".into()));
        }
        Ok(())
    }
}
