use crate::judge::VotingPolicy;
use crate::session::SessionMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Per-run settings, handed in once by the external config loader and
/// treated as immutable for the run's duration. Unknown fields and unknown
/// voting policy names are rejected at parse time; a run never starts on a
/// misread configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default = "defaults::max_turns")]
    pub max_turns: u32,
    #[serde(default = "defaults::max_backtracks")]
    pub max_backtracks: u32,
    /// Simultaneously in-flight conversations.
    #[serde(default = "defaults::parallel")]
    pub parallel: usize,
    #[serde(default)]
    pub voting: VotingPolicy,
    /// Per-transport-call timeout.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
    /// Optional whole-run deadline, checked between turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Seed for deterministic retry jitter and replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            max_turns: defaults::max_turns(),
            max_backtracks: defaults::max_backtracks(),
            parallel: defaults::parallel(),
            voting: VotingPolicy::default(),
            timeout_ms: defaults::timeout_ms(),
            deadline_ms: None,
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            seed: None,
        }
    }
}

impl RunSettings {
    pub fn from_yaml(doc: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(doc).context("config error: failed to parse run settings")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "defaults::cache_enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: defaults::cache_enabled(),
            ttl_ms: defaults::cache_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
        }
    }
}

mod defaults {
    pub fn max_turns() -> u32 {
        5
    }
    pub fn max_backtracks() -> u32 {
        2
    }
    pub fn parallel() -> usize {
        4
    }
    pub fn timeout_ms() -> u64 {
        30_000
    }
    pub fn cache_enabled() -> bool {
        true
    }
    // Grading calls stay valid for two weeks.
    pub fn cache_ttl_ms() -> u64 {
        14 * 24 * 60 * 60 * 1000
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay_ms() -> u64 {
        250
    }
    pub fn max_delay_ms() -> u64 {
        4_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = RunSettings::default();
        assert_eq!(s.mode, SessionMode::Stateless);
        assert_eq!(s.max_turns, 5);
        assert_eq!(s.parallel, 4);
        assert!(s.cache.enabled);
        assert_eq!(s.cache.ttl_ms, 1_209_600_000);
    }

    #[test]
    fn parses_full_document() {
        let yaml = r#"
mode: stateful
max_turns: 3
max_backtracks: 1
parallel: 8
voting:
  policy: majority-threshold
  threshold: 0.66
timeout_ms: 10000
deadline_ms: 120000
cache:
  enabled: false
  ttl_ms: 1000
retry:
  max_attempts: 2
  base_delay_ms: 100
  max_delay_ms: 800
seed: 42
"#;
        let s = RunSettings::from_yaml(yaml).unwrap();
        assert_eq!(s.mode, SessionMode::Stateful);
        assert_eq!(s.max_turns, 3);
        assert_eq!(
            s.voting,
            VotingPolicy::MajorityThreshold { threshold: 0.66 }
        );
        assert!(!s.cache.enabled);
        assert_eq!(s.seed, Some(42));
    }

    #[test]
    fn unknown_voting_policy_is_fatal() {
        let yaml = r#"
voting:
  policy: quorum-of-elders
"#;
        let err = RunSettings::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("config error"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RunSettings::from_yaml("max_turnz: 3\n").unwrap_err();
        assert!(err.to_string().contains("config error"));
    }
}
