mod policies;

pub use policies::{EscalationStrategy, ScriptedStrategy, TurnStrategy};

use crate::model::{CombinedVerdict, TerminationReason};

/// Where a conversation currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Sending,
    AwaitingVerdict,
    Terminated(TerminationReason),
}

/// What the engine decided after a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Backtrack,
    Terminate(TerminationReason),
}

/// Per-conversation state machine:
/// `Start -> Sending -> AwaitingVerdict -> {Continue, Backtrack, Terminate}`.
///
/// `turns_used` and `backtracks_used` are monotonic non-decreasing and reset
/// only at conversation start; once terminated the engine never leaves the
/// terminal state.
#[derive(Debug)]
pub struct TurnEngine {
    max_turns: u32,
    max_backtracks: u32,
    turns_used: u32,
    backtracks_used: u32,
    scores: Vec<f64>,
    phase: Phase,
}

impl TurnEngine {
    pub fn new(max_turns: u32, max_backtracks: u32) -> Self {
        Self {
            max_turns: max_turns.max(1),
            max_backtracks,
            turns_used: 0,
            backtracks_used: 0,
            scores: Vec::new(),
            phase: Phase::Start,
        }
    }

    pub fn begin_send(&mut self) {
        if !self.is_terminated() {
            self.phase = Phase::Sending;
        }
    }

    pub fn await_verdict(&mut self) {
        if !self.is_terminated() {
            self.phase = Phase::AwaitingVerdict;
        }
    }

    /// Feed the verdict for the turn that just completed.
    ///
    /// Every completed turn bumps `turns_used` by exactly one. A passing
    /// verdict terminates with `JudgePass`. Otherwise the turn budget is
    /// checked first; then, for strategies that support it, a stalled score
    /// (no improvement over the previous turn) triggers a backtrack while
    /// the backtrack budget lasts.
    pub fn on_verdict(&mut self, verdict: &CombinedVerdict, supports_backtrack: bool) -> Decision {
        if let Phase::Terminated(reason) = self.phase {
            return Decision::Terminate(reason);
        }

        self.turns_used += 1;
        self.scores.push(verdict.score);

        if verdict.pass {
            return self.terminate(TerminationReason::JudgePass);
        }
        if self.turns_used >= self.max_turns {
            return self.terminate(TerminationReason::MaxTurns);
        }
        if supports_backtrack && self.stalled() {
            if self.backtracks_used >= self.max_backtracks {
                return self.terminate(TerminationReason::MaxBacktracks);
            }
            self.backtracks_used += 1;
            // The discarded turn's score goes too, so the next comparison is
            // against the state we rolled back to.
            self.scores.pop();
            self.phase = Phase::Sending;
            return Decision::Backtrack;
        }

        self.phase = Phase::Sending;
        Decision::Continue
    }

    /// A fatal transport (or session) failure for this conversation.
    pub fn on_failure(&mut self, reason: TerminationReason) -> Decision {
        if let Phase::Terminated(existing) = self.phase {
            return Decision::Terminate(existing);
        }
        self.terminate(reason)
    }

    fn terminate(&mut self, reason: TerminationReason) -> Decision {
        self.phase = Phase::Terminated(reason);
        Decision::Terminate(reason)
    }

    fn stalled(&self) -> bool {
        let n = self.scores.len();
        n >= 2 && self.scores[n - 1] <= self.scores[n - 2]
    }

    pub fn turns_used(&self) -> u32 {
        self.turns_used
    }

    pub fn backtracks_used(&self) -> u32 {
        self.backtracks_used
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }
}
