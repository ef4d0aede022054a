use thiserror::Error;

/// Session-store failures. Both are fatal to the affected conversation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session '{0}' is closed")]
    Closed(String),
    /// The target's statefulness contract was violated: continuity was
    /// required but identity extraction yielded nothing (or a different id).
    #[error("lost session identity on session '{session}': {detail}")]
    Lost { session: String, detail: String },
}

/// Transport-layer failures surfaced to the orchestrator.
///
/// `Auth` is fatal to the whole run; the others are fatal to the affected
/// conversation only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport timeout after {0} ms")]
    Timeout(u64),
    #[error("rate limited by target (retry_after_ms={retry_after_ms:?})")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("authentication rejected by target (status {status})")]
    Auth { status: u16 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("target returned status {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Classify an HTTP status the target returned.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => TransportError::Auth { status },
            429 => TransportError::RateLimited {
                retry_after_ms: None,
            },
            _ => TransportError::Http { status },
        }
    }

    /// Timeouts, 429s, 5xx and network hiccups are worth another attempt;
    /// other 4xx and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_)
            | TransportError::RateLimited { .. }
            | TransportError::Network(_) => true,
            TransportError::Http { status } => *status >= 500,
            TransportError::Auth { .. } | TransportError::MalformedResponse(_) => false,
        }
    }

    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, TransportError::Auth { .. })
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            TransportError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            TransportError::from_status(401),
            TransportError::Auth { status: 401 }
        );
        assert_eq!(
            TransportError::from_status(429),
            TransportError::RateLimited {
                retry_after_ms: None
            }
        );
        assert_eq!(
            TransportError::from_status(503),
            TransportError::Http { status: 503 }
        );
    }

    #[test]
    fn retryable_kinds() {
        assert!(TransportError::Timeout(30_000).is_retryable());
        assert!(TransportError::RateLimited {
            retry_after_ms: Some(500)
        }
        .is_retryable());
        assert!(TransportError::Http { status: 502 }.is_retryable());
        assert!(TransportError::Network("connection reset".into()).is_retryable());

        assert!(!TransportError::Http { status: 400 }.is_retryable());
        assert!(!TransportError::Auth { status: 401 }.is_retryable());
        assert!(!TransportError::MalformedResponse("missing output".into()).is_retryable());
    }

    #[test]
    fn only_auth_is_fatal_to_run() {
        assert!(TransportError::Auth { status: 403 }.is_fatal_to_run());
        assert!(!TransportError::Timeout(1).is_fatal_to_run());
        assert!(!TransportError::Http { status: 500 }.is_fatal_to_run());
    }
}
