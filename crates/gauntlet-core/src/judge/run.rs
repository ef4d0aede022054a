use super::{prompt, JudgeClient, JudgePool};
use crate::cache::key::cache_key;
use crate::model::{Assertion, AssertionKind, CombinedVerdict, JudgeVerdict};
use std::collections::BTreeMap;

pub(crate) async fn grade_impl(
    pool: &JudgePool,
    output: &str,
    assertions: &[Assertion],
    vars: &BTreeMap<String, String>,
) -> CombinedVerdict {
    let mut per_judge = Vec::with_capacity(assertions.len());
    let mut weights = Vec::with_capacity(assertions.len());

    for assertion in assertions {
        let mut verdict = match &assertion.kind {
            AssertionKind::LlmRubric { rubric } => {
                match grade_rubric(pool, rubric, output, vars).await {
                    Ok(v) => v,
                    // A judge that errors is a failing verdict for that judge,
                    // never evaluation failure for the whole test.
                    Err(e) => {
                        tracing::warn!(assertion = %assertion.id, error = %e, "judge call degraded to failing verdict");
                        JudgeVerdict {
                            pass: false,
                            score: 0.0,
                            reason: format!("judge error: {e}"),
                            judge_id: pool.judge_id(),
                        }
                    }
                }
            }
            deterministic => evaluate_deterministic(deterministic, output),
        };

        // With an explicit threshold, passing requires the judge's own
        // boolean AND the score bar. {pass: true, score: 0} must not pass.
        if let Some(t) = assertion.threshold {
            let met = verdict.score >= t;
            if verdict.pass && !met {
                verdict.reason = format!(
                    "{} (score {:.2} below threshold {:.2})",
                    verdict.reason, verdict.score, t
                );
            }
            verdict.pass = verdict.pass && met;
        }

        weights.push(assertion.weight());
        per_judge.push(verdict);
    }

    pool.config.voting.combine(per_judge, &weights)
}

async fn grade_rubric(
    pool: &JudgePool,
    rubric: &str,
    output: &str,
    vars: &BTreeMap<String, String>,
) -> anyhow::Result<JudgeVerdict> {
    let client = pool
        .client
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("judge client is not configured"))?;

    let judge_prompt = prompt::build_prompt(rubric, output, vars);
    let key = cache_key(&pool.config.provider, &judge_prompt, &pool.fingerprint());
    if pool.config.refresh {
        pool.cache.invalidate(&key).await;
    }

    let judge_id = pool.judge_id();
    let value = pool
        .cache
        .get_or_compute(&key, pool.config.cache_ttl_ms, || async {
            let verdict = call_judge(client.as_ref(), &judge_prompt, &judge_id).await?;
            Ok(serde_json::to_value(&verdict)?)
        })
        .await?;
    Ok(serde_json::from_value(value)?)
}

/// One grading call with schema enforcement: on a malformed reply, retry
/// once with a JSON-only instruction, then fall back to a failing verdict.
/// A judge must never silently pass on malformed output.
async fn call_judge(
    client: &dyn JudgeClient,
    judge_prompt: &str,
    judge_id: &str,
) -> anyhow::Result<JudgeVerdict> {
    let text = client.complete(judge_prompt, prompt::SYSTEM_PROMPT).await?;
    match parse_verdict(&text, judge_id) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "judge reply failed schema validation, retrying JSON-only");
            let retry_prompt = format!("{judge_prompt}\n\n{}", prompt::JSON_ONLY_RETRY);
            let text = client.complete(&retry_prompt, prompt::SYSTEM_PROMPT).await?;
            Ok(parse_verdict(&text, judge_id).unwrap_or_else(|_| JudgeVerdict {
                pass: false,
                score: 0.0,
                reason: "unparseable judge output".to_string(),
                judge_id: judge_id.to_string(),
            }))
        }
    }
}

fn parse_verdict(text: &str, judge_id: &str) -> anyhow::Result<JudgeVerdict> {
    let trimmed = text.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("no JSON object in judge reply"))?;
    let val: serde_json::Value = serde_json::Deserializer::from_str(&trimmed[start..])
        .into_iter::<serde_json::Value>()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no JSON document in judge reply"))?
        .map_err(|e| anyhow::anyhow!("invalid JSON in judge reply: {e}"))?;

    let pass = val
        .get("pass")
        .and_then(serde_json::Value::as_bool)
        .ok_or_else(|| anyhow::anyhow!("judge JSON missing 'pass'"))?;
    let score = val
        .get("score")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("judge JSON missing 'score'"))?
        .clamp(0.0, 1.0);
    let reason = val
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
        .to_string();

    Ok(JudgeVerdict {
        pass,
        score,
        reason,
        judge_id: judge_id.to_string(),
    })
}

fn evaluate_deterministic(kind: &AssertionKind, output: &str) -> JudgeVerdict {
    let (pass, reason, judge_id) = match kind {
        AssertionKind::Contains { value } => (
            output.contains(value.as_str()),
            format!("output contains '{value}'"),
            "deterministic:contains",
        ),
        AssertionKind::NotContains { value } => (
            !output.contains(value.as_str()),
            format!("output does not contain '{value}'"),
            "deterministic:not-contains",
        ),
        AssertionKind::Regex { pattern } => match regex::Regex::new(pattern) {
            Ok(re) => (
                re.is_match(output),
                format!("output matches /{pattern}/"),
                "deterministic:regex",
            ),
            Err(e) => {
                return JudgeVerdict {
                    pass: false,
                    score: 0.0,
                    reason: format!("invalid regex '{pattern}': {e}"),
                    judge_id: "deterministic:regex".to_string(),
                }
            }
        },
        AssertionKind::Equals { value } => (
            output == value,
            format!("output equals '{value}'"),
            "deterministic:equals",
        ),
        AssertionKind::LlmRubric { .. } => {
            // Routed before we get here; a failing verdict is safer than a panic.
            return JudgeVerdict {
                pass: false,
                score: 0.0,
                reason: "model-graded assertion reached the deterministic evaluator".to_string(),
                judge_id: "deterministic:misrouted".to_string(),
            };
        }
    };

    JudgeVerdict {
        pass,
        score: if pass { 1.0 } else { 0.0 },
        reason: if pass {
            reason
        } else {
            format!("failed: {reason}")
        },
        judge_id: judge_id.to_string(),
    }
}
