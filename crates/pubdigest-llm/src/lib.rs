//! pubdigest-llm: language-model backend abstraction layer.
//! Chat-completion backends, bounded retry, token estimation and
//! per-call audit records.

pub mod audit;
pub mod backend;
pub mod mock;
pub mod retry;
pub mod tokens;

pub use backend::{LlmBackend, LlmError, LlmRequest, LlmResponse, Message};
pub use retry::{complete_with_retry, CallOutcome, RetryPolicy};
pub use tokens::{Encoding, TokenEstimator};
