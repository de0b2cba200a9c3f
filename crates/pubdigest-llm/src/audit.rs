//! Audit records for model calls.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::LlmResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAuditEntry {
    pub id: Uuid,
    pub task: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub output_hash: String,
    pub attempts: u32,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl LlmAuditEntry {
    pub fn new(task: &str, response: &LlmResponse, attempts: u32, latency: Duration) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(response.content.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            task: task.to_string(),
            model: response.model.clone(),
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            output_hash,
            attempts,
            latency_ms: latency.as_millis() as u64,
            called_at: Utc::now(),
        }
    }

    pub fn log(&self) {
        tracing::info!(
            audit_id = %self.id,
            task = %self.task,
            model = %self.model,
            prompt_tokens = self.prompt_tokens,
            completion_tokens = self.completion_tokens,
            attempts = self.attempts,
            latency_ms = self.latency_ms,
            output_hash = %self.output_hash,
            "LLM call completed"
        );
    }
}
