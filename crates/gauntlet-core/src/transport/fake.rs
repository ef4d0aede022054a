use super::{HttpCall, RawResponse};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Scripted network stage for tests and offline replay: serves queued
/// replies in order and records every outgoing payload so callers can
/// assert on wire shapes.
pub struct FakeHttp {
    replies: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    recorded: Mutex<Vec<serde_json::Value>>,
    provider: String,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
            provider: "fake".to_string(),
        }
    }

    /// Queue a chat-shaped success reply; `session_id` lands in the body for
    /// identity-extraction tests.
    pub fn push_text(self, content: &str, session_id: Option<&str>) -> Self {
        let mut body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1}
        });
        if let Some(sid) = session_id {
            body["session_id"] = serde_json::json!(sid);
        }
        self.push_raw(Ok(RawResponse {
            status: 200,
            headers: BTreeMap::new(),
            body,
        }))
    }

    pub fn push_error(self, err: TransportError) -> Self {
        self.push_raw(Err(err))
    }

    pub fn push_raw(self, reply: Result<RawResponse, TransportError>) -> Self {
        self.lock_replies().push_back(reply);
        self
    }

    pub fn recorded_payloads(&self) -> Vec<serde_json::Value> {
        match self.recorded.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn calls(&self) -> usize {
        self.recorded_payloads().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<RawResponse, TransportError>>> {
        match self.replies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for FakeHttp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpCall for FakeHttp {
    async fn post_json(&self, payload: &serde_json::Value) -> Result<RawResponse, TransportError> {
        match self.recorded.lock() {
            Ok(mut guard) => guard.push(payload.clone()),
            Err(poisoned) => poisoned.into_inner().push(payload.clone()),
        }
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("fake transcript exhausted".into())))
    }

    fn provider_id(&self) -> &str {
        &self.provider
    }
}
