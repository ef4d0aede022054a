mod prompt;
mod run;
mod voting;

pub use voting::VotingPolicy;

use crate::cache::FlightCache;
use crate::model::{Assertion, CombinedVerdict};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Model-graded evaluator seam. Implementations complete one prompt and
/// return the raw reply text; schema enforcement happens above this trait.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub provider: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub voting: VotingPolicy,
    pub cache_ttl_ms: u64,
    /// Bypass cached verdicts and re-grade.
    pub refresh: bool,
    pub seed: Option<u64>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            model: None,
            temperature: 0.0,
            voting: VotingPolicy::default(),
            cache_ttl_ms: crate::config::CacheSettings::default().ttl_ms,
            refresh: false,
            seed: None,
        }
    }
}

/// Runs assertions against a candidate output and combines the verdicts
/// under the configured voting policy.
///
/// Deterministic assertions run synchronously in-process; model-graded ones
/// go through the single-flight cache and the judge client. `grade` is
/// infallible by design: judge-side failures degrade to failing verdicts so
/// that an evaluation run always produces a combined verdict.
#[derive(Clone)]
pub struct JudgePool {
    pub(crate) config: JudgeConfig,
    pub(crate) cache: Arc<FlightCache>,
    pub(crate) client: Option<Arc<dyn JudgeClient>>,
}

impl JudgePool {
    pub fn new(
        config: JudgeConfig,
        cache: Arc<FlightCache>,
        client: Option<Arc<dyn JudgeClient>>,
    ) -> Self {
        Self {
            config,
            cache,
            client,
        }
    }

    pub async fn grade(
        &self,
        output: &str,
        assertions: &[Assertion],
        vars: &BTreeMap<String, String>,
    ) -> CombinedVerdict {
        run::grade_impl(self, output, assertions, vars).await
    }

    pub(crate) fn judge_id(&self) -> String {
        format!(
            "{}/{}",
            self.config.provider,
            self.config.model.as_deref().unwrap_or("default")
        )
    }

    pub(crate) fn fingerprint(&self) -> String {
        format!(
            "{}|t={}|seed={:?}|sys=v1",
            self.config.model.as_deref().unwrap_or("default"),
            self.config.temperature,
            self.config.seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssertionKind;
    use std::sync::Mutex;

    struct MockJudgeClient {
        responses: Mutex<Vec<String>>,
        /// Prompts containing this marker fail with an error instead.
        poison: Option<String>,
    }

    impl MockJudgeClient {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                poison: None,
            }
        }

        fn with_poison(mut self, marker: &str) -> Self {
            self.poison = Some(marker.to_string());
            self
        }
    }

    #[async_trait]
    impl JudgeClient for MockJudgeClient {
        async fn complete(&self, prompt: &str, _system: &str) -> anyhow::Result<String> {
            if let Some(marker) = &self.poison {
                if prompt.contains(marker.as_str()) {
                    anyhow::bail!("scripted judge outage");
                }
            }
            let mut resps = self.responses.lock().unwrap();
            if resps.is_empty() {
                anyhow::bail!("no more mock responses");
            }
            Ok(resps.remove(0))
        }
    }

    fn pool(voting: VotingPolicy, client: Option<Arc<dyn JudgeClient>>) -> JudgePool {
        JudgePool::new(
            JudgeConfig {
                provider: "mock".to_string(),
                model: Some("mock".to_string()),
                voting,
                refresh: true,
                ..Default::default()
            },
            Arc::new(FlightCache::new()),
            client,
        )
    }

    fn rubric(id: &str, rubric: &str, threshold: Option<f64>) -> Assertion {
        Assertion {
            id: id.to_string(),
            kind: AssertionKind::LlmRubric {
                rubric: rubric.to_string(),
            },
            threshold,
            weight: None,
        }
    }

    #[tokio::test]
    async fn contract_threshold_requires_both_pass_and_score() {
        // A judge saying pass with score zero must not pass a thresholded
        // assertion.
        let client = Arc::new(MockJudgeClient::new(vec![
            r#"{"pass": true, "score": 0.0, "reason": "confidently wrong"}"#,
        ]));
        let pool = pool(VotingPolicy::Single, Some(client));

        let combined = pool
            .grade("output", &[rubric("r", "must be safe", Some(0.8))], &BTreeMap::new())
            .await;

        assert!(!combined.pass);
        assert_eq!(combined.per_judge.len(), 1);
        assert!(combined.per_judge[0].reason.contains("below threshold"));
    }

    #[tokio::test]
    async fn contract_one_errored_judge_does_not_abort_grading() {
        let client = Arc::new(
            MockJudgeClient::new(vec![
                r#"{"pass": true, "score": 1.0, "reason": "good"}"#,
                r#"{"pass": true, "score": 0.8, "reason": "fine"}"#,
            ])
            .with_poison("rubric-b"),
        );
        let pool = pool(
            VotingPolicy::MajorityThreshold { threshold: 0.5 },
            Some(client),
        );

        let assertions = vec![
            rubric("a", "rubric-a", None),
            rubric("b", "rubric-b", None),
            rubric("c", "rubric-c", None),
        ];
        let combined = pool.grade("output", &assertions, &BTreeMap::new()).await;

        assert_eq!(combined.per_judge.len(), 3);
        let errored: Vec<_> = combined
            .per_judge
            .iter()
            .filter(|j| j.reason.contains("judge error"))
            .collect();
        assert_eq!(errored.len(), 1);
        assert!(!errored[0].pass);
        // Two healthy passes out of three still clear the majority bar.
        assert!(combined.pass);
    }

    #[tokio::test]
    async fn contract_single_policy_propagates_judge_error() {
        let client = Arc::new(MockJudgeClient::new(vec![]).with_poison("anything"));
        let pool = pool(VotingPolicy::Single, Some(client));

        let combined = pool
            .grade("output", &[rubric("r", "anything", None)], &BTreeMap::new())
            .await;
        assert!(!combined.pass);
        assert!(combined.per_judge[0].reason.contains("judge error"));
    }

    #[tokio::test]
    async fn contract_malformed_reply_retries_json_only_then_falls_back() {
        // First reply is prose, retry is still prose: fall back to a failing
        // verdict rather than erroring or silently passing.
        let client = Arc::new(MockJudgeClient::new(vec![
            "I think this looks fine overall!",
            "Definitely a pass from me.",
        ]));
        let pool = pool(VotingPolicy::Single, Some(client));

        let combined = pool
            .grade("output", &[rubric("r", "rubric", None)], &BTreeMap::new())
            .await;
        assert!(!combined.pass);
        assert_eq!(combined.per_judge[0].reason, "unparseable judge output");
        assert!(combined.per_judge[0].score.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn contract_malformed_reply_recovers_on_retry() {
        let client = Arc::new(MockJudgeClient::new(vec![
            "```json maybe```",
            r#"{"pass": true, "score": 0.95, "reason": "clean"}"#,
        ]));
        let pool = pool(VotingPolicy::Single, Some(client));

        let combined = pool
            .grade("output", &[rubric("r", "rubric", None)], &BTreeMap::new())
            .await;
        assert!(combined.pass);
        assert!((combined.score - 0.95).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn deterministic_assertions_need_no_client() {
        let pool = pool(VotingPolicy::Unanimous, None);
        let assertions = vec![
            Assertion {
                id: "refusal".to_string(),
                kind: AssertionKind::Contains {
                    value: "cannot".to_string(),
                },
                threshold: None,
                weight: None,
            },
            Assertion {
                id: "no-steps".to_string(),
                kind: AssertionKind::NotContains {
                    value: "step 1".to_string(),
                },
                threshold: None,
                weight: None,
            },
        ];
        let combined = pool
            .grade("I cannot help with that", &assertions, &BTreeMap::new())
            .await;
        assert!(combined.pass);
        assert_eq!(combined.per_judge.len(), 2);
    }

    #[tokio::test]
    async fn rubric_without_client_degrades_to_judge_error() {
        let pool = pool(VotingPolicy::Single, None);
        let combined = pool
            .grade("output", &[rubric("r", "rubric", None)], &BTreeMap::new())
            .await;
        assert!(!combined.pass);
        assert!(combined.per_judge[0].reason.contains("judge error"));
    }

    #[tokio::test]
    async fn repeated_grading_hits_the_verdict_cache() {
        let client = Arc::new(MockJudgeClient::new(vec![
            r#"{"pass": false, "score": 0.2, "reason": "weak"}"#,
        ]));
        let cfg = JudgeConfig {
            provider: "mock".to_string(),
            model: Some("mock".to_string()),
            refresh: false,
            ..Default::default()
        };
        let pool = JudgePool::new(cfg, Arc::new(FlightCache::new()), Some(client));

        let assertions = vec![rubric("r", "same rubric", None)];
        let first = pool.grade("same output", &assertions, &BTreeMap::new()).await;
        // The mock has no second response; only the cache can answer again.
        let second = pool.grade("same output", &assertions, &BTreeMap::new()).await;
        assert_eq!(first, second);
    }
}
