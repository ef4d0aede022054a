use super::{HttpCall, RawResponse, RequestCodec};
use crate::cache::{key::cache_key, FlightCache};
use crate::errors::TransportError;
use crate::model::{Message, Turn};
use crate::session::{SessionMode, SessionParser};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A completed send: the produced `Turn` plus whatever session identity the
/// configured parser extracted from the raw reply.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub turn: Turn,
    pub session_identity: Option<String>,
}

/// Sends one conversational turn and normalizes the reply.
///
/// Composes three ordered, independently replaceable stages: request
/// transform (codec encode), network call (with per-call timeout and
/// backoff retry), and response transform (codec decode plus identity
/// extraction). The adapter never mutates the session; appending the reply
/// to history is the orchestrator's job after a successful send.
pub struct TransportAdapter {
    http: Arc<dyn HttpCall>,
    codec: Arc<dyn RequestCodec>,
    parser: Arc<dyn SessionParser>,
    retry: super::RetryPolicy,
    timeout_ms: u64,
    cache: Option<(Arc<FlightCache>, u64)>,
}

impl TransportAdapter {
    pub fn new(
        http: Arc<dyn HttpCall>,
        codec: Arc<dyn RequestCodec>,
        parser: Arc<dyn SessionParser>,
        retry: super::RetryPolicy,
        timeout_ms: u64,
    ) -> Self {
        Self {
            http,
            codec,
            parser,
            retry,
            timeout_ms,
            cache: None,
        }
    }

    /// Memoize whole turns through the single-flight cache.
    pub fn with_cache(mut self, cache: Arc<FlightCache>, ttl_ms: u64) -> Self {
        self.cache = Some((cache, ttl_ms));
        self
    }

    /// Send the newest message of `history`.
    ///
    /// In stateful mode with a known remote identity, only the newest
    /// message goes over the wire; otherwise the complete, order-preserving
    /// history is sent.
    pub async fn send(
        &self,
        history: &[Message],
        remote_session: Option<&str>,
        mode: SessionMode,
    ) -> Result<Dispatch, TransportError> {
        let latest = history.last().ok_or_else(|| {
            TransportError::MalformedResponse("cannot send an empty history".to_string())
        })?;

        let window: &[Message] = match mode {
            SessionMode::Stateful if remote_session.is_some() => &history[history.len() - 1..],
            _ => history,
        };
        let payload = self.codec.encode(window, remote_session);

        let started = Instant::now();
        let raw = self.call(&payload).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let decoded = self.codec.decode(&raw)?;
        let session_identity = self.parser.extract(&raw);

        Ok(Dispatch {
            turn: Turn {
                sent: latest.clone(),
                received: Message::assistant(decoded.output),
                latency_ms,
                usage: decoded.usage,
                meta: json!({
                    "provider": self.http.provider_id(),
                    "status": raw.status,
                }),
            },
            session_identity,
        })
    }

    async fn call(&self, payload: &serde_json::Value) -> Result<RawResponse, TransportError> {
        let Some((cache, ttl_ms)) = &self.cache else {
            return self.call_with_retry(payload).await;
        };
        let key = cache_key(
            self.http.provider_id(),
            &payload.to_string(),
            &self.codec.fingerprint(),
        );
        let value = cache
            .get_or_compute(&key, *ttl_ms, || async {
                let raw = self.call_with_retry(payload).await?;
                Ok(serde_json::to_value(&raw)?)
            })
            .await
            .map_err(Self::unwrap_transport)?;
        serde_json::from_value(value)
            .map_err(|e| TransportError::MalformedResponse(format!("bad cache entry: {e}")))
    }

    async fn call_with_retry(
        &self,
        payload: &serde_json::Value,
    ) -> Result<RawResponse, TransportError> {
        let mut attempt = 1u32;
        loop {
            let outcome = match tokio::time::timeout(
                Duration::from_millis(self.timeout_ms),
                self.http.post_json(payload),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(TransportError::Timeout(self.timeout_ms)),
            };

            match outcome {
                Ok(raw) => return Ok(raw),
                Err(err) => {
                    if !self.retry.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(attempt, err.retry_after_ms());
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transport retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn unwrap_transport(err: anyhow::Error) -> TransportError {
        match err.downcast::<TransportError>() {
            Ok(t) => t,
            Err(other) => TransportError::Network(other.to_string()),
        }
    }
}
