use super::{HttpCall, RawResponse};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Production network stage: one JSON POST against the target endpoint with
/// optional bearer auth. Non-2xx statuses come back as typed errors; the
/// Retry-After header is surfaced on 429 so the retry policy can honour it.
pub struct ReqwestHttp {
    pub url: String,
    pub api_key: Option<String>,
    pub provider: String,
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key,
            provider: provider.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpCall for ReqwestHttp {
    async fn post_json(&self, payload: &serde_json::Value) -> Result<RawResponse, TransportError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(0)
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        if status == 429 {
            let retry_after_ms = headers
                .get("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(TransportError::RateLimited { retry_after_ms });
        }
        if !(200..300).contains(&status) {
            return Err(TransportError::from_status(status));
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| TransportError::MalformedResponse(format!("invalid JSON body: {e}")))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn provider_id(&self) -> &str {
        &self.provider
    }
}
