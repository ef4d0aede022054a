mod adapter;
mod codec;
mod fake;
mod http;
mod retry;

pub use adapter::{Dispatch, TransportAdapter};
pub use codec::{ChatCodec, DecodedReply, RequestCodec};
pub use fake::FakeHttp;
pub use http::ReqwestHttp;
pub use retry::RetryPolicy;

use crate::errors::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized reply from the network stage: status, headers, parsed body.
/// Provider-specific client code only has to produce this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

/// The network-call stage of the adapter. Implementations perform one POST
/// and surface typed errors for timeout/auth/rate-limit; retry policy lives
/// above this seam.
#[async_trait]
pub trait HttpCall: Send + Sync {
    async fn post_json(&self, payload: &serde_json::Value) -> Result<RawResponse, TransportError>;

    /// Stable identity used in cache keys.
    fn provider_id(&self) -> &str;
}
