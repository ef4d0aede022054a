use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{broadcast, Mutex};

/// Outcome shared with waiters. Errors travel as strings; they are never
/// cached, so the next caller recomputes.
type Shared = Result<Value, String>;

enum Slot {
    Ready {
        value: Value,
        expires_at: DateTime<Utc>,
    },
    InFlight(broadcast::Sender<Shared>),
}

enum Role {
    Leader(broadcast::Sender<Shared>),
    Follower(broadcast::Receiver<Shared>),
}

/// In-process memoization with a single-flight guarantee: concurrent callers
/// with the same key await the first caller's in-flight computation instead
/// of issuing duplicate calls. Entries expire lazily on read; there is no
/// background sweep.
#[derive(Default)]
pub struct FlightCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl FlightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl_ms: u64,
        compute: F,
    ) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let role = {
            let mut slots = self.slots.lock().await;
            match slots.get(key) {
                Some(Slot::Ready { value, expires_at }) if *expires_at > Utc::now() => {
                    tracing::debug!(key, "cache hit");
                    return Ok(value.clone());
                }
                Some(Slot::InFlight(tx)) => Role::Follower(tx.subscribe()),
                // Vacant or expired: this caller becomes the leader.
                _ => {
                    let (tx, _) = broadcast::channel(1);
                    slots.insert(key.to_string(), Slot::InFlight(tx.clone()));
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(msg)) => Err(anyhow::anyhow!(msg)),
                Err(_) => Err(anyhow::anyhow!("cache: in-flight computation was dropped")),
            },
            Role::Leader(tx) => {
                let result = compute().await;
                let mut slots = self.slots.lock().await;
                match &result {
                    Ok(value) => {
                        slots.insert(
                            key.to_string(),
                            Slot::Ready {
                                value: value.clone(),
                                expires_at: Utc::now() + Duration::milliseconds(ttl_ms as i64),
                            },
                        );
                        let _ = tx.send(Ok(value.clone()));
                    }
                    Err(e) => {
                        slots.remove(key);
                        let _ = tx.send(Err(e.to_string()));
                    }
                }
                result
            }
        }
    }

    /// Drop an entry regardless of freshness (refresh support).
    pub async fn invalidate(&self, key: &str) {
        self.slots.lock().await.remove(key);
    }
}
