mod parser;
mod store;

pub use parser::{BodyPointerParser, HeaderParser, SessionParser};
pub use store::{PooledSession, Session, SessionPool, SessionStore};

use serde::{Deserialize, Serialize};

/// How conversation history reaches the target.
///
/// Stateful: the target retains history server-side, keyed by the extracted
/// session identity; only the newest message is retransmitted. Stateless:
/// the full, order-preserving history is resent on every turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Stateful,
    #[default]
    Stateless,
}
