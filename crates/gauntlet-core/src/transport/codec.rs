use super::RawResponse;
use crate::errors::TransportError;
use crate::model::{Message, TokenUsage};
use serde_json::json;

/// Output of the response-transform stage.
#[derive(Debug, Clone)]
pub struct DecodedReply {
    pub output: String,
    pub usage: TokenUsage,
}

/// Request/response transform stages of the adapter. Encode maps the message
/// window plus session metadata into a wire payload; decode extracts the
/// candidate output and token usage from the raw reply.
pub trait RequestCodec: Send + Sync {
    fn encode(&self, window: &[Message], remote_session: Option<&str>) -> serde_json::Value;

    fn decode(&self, raw: &RawResponse) -> Result<DecodedReply, TransportError>;

    /// Sampling-relevant config, folded into cache keys.
    fn fingerprint(&self) -> String;
}

/// Chat-completions shaped codec. Messages go out as `{role, content}`
/// pairs; when a remote session identity is known it rides in the body so
/// stateful targets can resume their server-side history.
pub struct ChatCodec {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatCodec {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl RequestCodec for ChatCodec {
    fn encode(&self, window: &[Message], remote_session: Option<&str>) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = window
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(sid) = remote_session {
            body["session_id"] = json!(sid);
        }
        body
    }

    fn decode(&self, raw: &RawResponse) -> Result<DecodedReply, TransportError> {
        let output = raw
            .body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TransportError::MalformedResponse(
                    "reply is missing choices[0].message.content".to_string(),
                )
            })?
            .to_string();

        let usage = TokenUsage {
            prompt_tokens: raw
                .body
                .pointer("/usage/prompt_tokens")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32,
            completion_tokens: raw
                .body
                .pointer("/usage/completion_tokens")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32,
        };

        Ok(DecodedReply { output, usage })
    }

    fn fingerprint(&self) -> String {
        format!("{}|t={}|max={}", self.model, self.temperature, self.max_tokens)
    }
}
