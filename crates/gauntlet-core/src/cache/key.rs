use sha2::{Digest, Sha256};

/// Content-hash cache key over provider identity, request payload and the
/// sampling-relevant config fingerprint (model, temperature, seed).
pub fn cache_key(provider: &str, payload: &str, fingerprint: &str) -> String {
    let mut h = Sha256::new();
    h.update(provider.as_bytes());
    h.update(b"\n");
    h.update(payload.as_bytes());
    h.update(b"\n");
    h.update(fingerprint.as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_component_sensitive() {
        let a = cache_key("openai", "{\"x\":1}", "gpt-4o|t=0");
        let b = cache_key("openai", "{\"x\":1}", "gpt-4o|t=0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, cache_key("anthropic", "{\"x\":1}", "gpt-4o|t=0"));
        assert_ne!(a, cache_key("openai", "{\"x\":2}", "gpt-4o|t=0"));
        assert_ne!(a, cache_key("openai", "{\"x\":1}", "gpt-4o|t=1"));
    }
}
