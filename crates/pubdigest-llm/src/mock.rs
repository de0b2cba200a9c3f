//! Scripted backend for tests and offline runs.
//!
//! Replies are consumed in order; once the script is exhausted every call
//! fails with [`LlmError::Unavailable`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{LlmBackend, LlmError, LlmRequest, LlmResponse};

pub struct ScriptedBackend {
    model: String,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn fail(self, reason: impl Into<String>) -> Self {
        self.push(Err(LlmError::Unavailable(reason.into())))
    }

    pub fn fail_with(self, err: LlmError) -> Self {
        self.push(Err(err))
    }

    pub fn fail_times(mut self, n: usize, reason: &str) -> Self {
        for _ in 0..n {
            self = self.fail(reason);
        }
        self
    }

    fn push(self, item: Result<String, LlmError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let prompt_tokens = (req.prompt_text().len() / 4) as u32;
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req);
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Unavailable("script lock poisoned".to_string()))?
            .pop_front();
        match next {
            Some(Ok(content)) => Ok(LlmResponse {
                completion_tokens: (content.len() / 4) as u32,
                content,
                model: self.model.clone(),
                prompt_tokens,
            }),
            Some(Err(err)) => Err(err),
            None => Err(LlmError::Unavailable("script exhausted".to_string())),
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_context_tokens(&self) -> usize {
        8_192
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_unavailable() {
        let b = ScriptedBackend::new("gpt-4").reply("one").fail("boom").reply("two");
        assert_eq!(b.complete(LlmRequest::user("a")).await.unwrap().content, "one");
        assert!(b.complete(LlmRequest::user("b")).await.is_err());
        assert_eq!(b.complete(LlmRequest::user("c")).await.unwrap().content, "two");
        assert!(matches!(
            b.complete(LlmRequest::user("d")).await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(b.call_count(), 4);
        assert_eq!(b.requests()[2].prompt_text(), "c");
    }

    #[test]
    fn test_fail_times_queues_n_failures() {
        let b = ScriptedBackend::new("gpt-4").fail_times(3, "x").reply("ok");
        assert_eq!(b.remaining(), 4);
    }
}
