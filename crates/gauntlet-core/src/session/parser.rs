use crate::transport::RawResponse;

/// Pluggable extraction of a session identity from a raw transport reply.
///
/// The store is agnostic to transport shape; it keeps whatever identity
/// string extraction yields. Targets differ (header, cookie, body field), so
/// the caller supplies the parser.
pub trait SessionParser: Send + Sync {
    fn extract(&self, raw: &RawResponse) -> Option<String>;
}

/// Reads the identity from a response header (case-insensitive name).
pub struct HeaderParser {
    name: String,
}

impl HeaderParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
        }
    }
}

impl SessionParser for HeaderParser {
    fn extract(&self, raw: &RawResponse) -> Option<String> {
        raw.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.name))
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Reads the identity from a JSON pointer into the response body.
pub struct BodyPointerParser {
    pointer: String,
}

impl BodyPointerParser {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl SessionParser for BodyPointerParser {
    fn extract(&self, raw: &RawResponse) -> Option<String> {
        let v = raw.body.pointer(&self.pointer)?;
        match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
