use crate::model::{CombinedVerdict, JudgeVerdict};
use serde::{Deserialize, Serialize};

/// Rule for combining per-judge verdicts into one. Unknown policy names are
/// a parse error, so a run never starts on a policy it does not understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum VotingPolicy {
    /// The first judge's verdict stands alone.
    #[default]
    Single,
    /// Every judge must pass; the score is the weakest judge's score.
    Unanimous,
    /// Passes when the passing fraction reaches the threshold; the score is
    /// the mean.
    MajorityThreshold { threshold: f64 },
    /// Majority with per-assertion weights (default weight 1.0).
    Weighted { threshold: f64 },
}

impl VotingPolicy {
    /// `pass` is a deterministic function of the verdicts and the policy.
    /// An empty verdict list combines to a pass: nothing was checked, so
    /// nothing failed.
    pub fn combine(&self, per_judge: Vec<JudgeVerdict>, weights: &[f64]) -> CombinedVerdict {
        if per_judge.is_empty() {
            return CombinedVerdict {
                pass: true,
                score: 1.0,
                per_judge,
            };
        }

        let n = per_judge.len() as f64;
        let (pass, score) = match self {
            VotingPolicy::Single => (per_judge[0].pass, per_judge[0].score),
            VotingPolicy::Unanimous => (
                per_judge.iter().all(|j| j.pass),
                per_judge.iter().map(|j| j.score).fold(f64::INFINITY, f64::min),
            ),
            VotingPolicy::MajorityThreshold { threshold } => {
                let passing = per_judge.iter().filter(|j| j.pass).count() as f64;
                let mean = per_judge.iter().map(|j| j.score).sum::<f64>() / n;
                (passing / n >= *threshold, mean)
            }
            VotingPolicy::Weighted { threshold } => {
                let total: f64 = weights.iter().take(per_judge.len()).sum();
                if total <= 0.0 {
                    // Degenerate weights: fall back to an unweighted majority.
                    let passing = per_judge.iter().filter(|j| j.pass).count() as f64;
                    let mean = per_judge.iter().map(|j| j.score).sum::<f64>() / n;
                    (passing / n >= *threshold, mean)
                } else {
                    let weight_of = |i: usize| weights.get(i).copied().unwrap_or(1.0);
                    let passing: f64 = per_judge
                        .iter()
                        .enumerate()
                        .filter(|(_, j)| j.pass)
                        .map(|(i, _)| weight_of(i))
                        .sum();
                    let score: f64 = per_judge
                        .iter()
                        .enumerate()
                        .map(|(i, j)| weight_of(i) * j.score)
                        .sum::<f64>()
                        / total;
                    (passing / total >= *threshold, score)
                }
            }
        };

        CombinedVerdict {
            pass,
            score,
            per_judge,
        }
    }
}
