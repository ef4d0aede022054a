use crate::config::RunSettings;
use crate::errors::SessionError;
use crate::judge::JudgePool;
use crate::model::{
    CombinedVerdict, ConversationResult, Message, TerminationReason, TestCase, Turn,
};
use crate::session::SessionStore;
use crate::strategy::{Decision, TurnEngine, TurnStrategy};
use crate::transport::TransportAdapter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Drives the (test case x turn) loop: conversations run concurrently up to
/// the configured limit, while each conversation's own turns stay strictly
/// sequential because turn k+1 depends on turn k's combined verdict.
///
/// Every test case yields exactly one `ConversationResult`, fatal errors
/// included, so a run's summary always has one row per case.
pub struct Orchestrator {
    pub store: SessionStore,
    pub transport: Arc<TransportAdapter>,
    pub judges: Arc<JudgePool>,
    pub strategy: Arc<dyn TurnStrategy>,
    pub settings: RunSettings,
}

impl Orchestrator {
    /// Results are collected in completion order internally but returned
    /// sorted by case id for deterministic output.
    pub async fn run_suite(&self, cases: &[TestCase]) -> anyhow::Result<Vec<ConversationResult>> {
        let parallel = self.settings.parallel.max(1);
        let sem = Arc::new(Semaphore::new(parallel));
        let mut join_set = JoinSet::new();
        let abort = Arc::new(AtomicBool::new(false));
        let deadline = self
            .settings
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        for case in cases {
            let permit = sem.clone().acquire_owned().await?;
            let this = self.clone_for_task();
            let case = case.clone();
            let abort = abort.clone();
            join_set.spawn(async move {
                let _permit = permit;
                this.run_conversation(&case, &abort, deadline).await
            });
        }

        let mut results = Vec::new();
        while let Some(res) = join_set.join_next().await {
            let row = match res {
                Ok(row) => row,
                Err(e) => ConversationResult {
                    case_id: "unknown".to_string(),
                    turns: Vec::new(),
                    final_verdict: None,
                    termination_reason: TerminationReason::TransportError,
                    message: format!("join error: {e}"),
                    duration_ms: None,
                },
            };
            results.push(row);
        }

        results.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        Ok(results)
    }

    async fn run_conversation(
        &self,
        case: &TestCase,
        abort: &AtomicBool,
        deadline: Option<Instant>,
    ) -> ConversationResult {
        let started = Instant::now();
        let mode = self.settings.mode;
        let session = self.store.get_or_create(&case.id);
        let mut engine = TurnEngine::new(self.settings.max_turns, self.settings.max_backtracks);
        let mut turns: Vec<Turn> = Vec::new();
        let mut final_verdict: Option<CombinedVerdict> = None;
        let mut message = String::new();

        if let Some(sys) = &case.system_prompt {
            if let Err(e) = self.store.append(&session.id, Message::system(sys)) {
                return self.finish(
                    case,
                    &session.id,
                    turns,
                    final_verdict,
                    TerminationReason::TransportError,
                    e.to_string(),
                    started,
                );
            }
        }

        let mut next = self.strategy.opening_message(&case.objective);
        let reason = loop {
            // Cooperative cancellation: the deadline and the auth-abort flag
            // are checked between turns, never mid-call.
            if deadline.is_some_and(|d| Instant::now() >= d) {
                engine.on_failure(TerminationReason::Timeout);
                break TerminationReason::Timeout;
            }
            if abort.load(Ordering::SeqCst) {
                message = "run aborted: authentication failure".to_string();
                engine.on_failure(TerminationReason::TransportError);
                break TerminationReason::TransportError;
            }

            engine.begin_send();
            if let Err(e) = self.store.append(&session.id, next.clone()) {
                message = e.to_string();
                engine.on_failure(TerminationReason::TransportError);
                break TerminationReason::TransportError;
            }
            let history = self.store.history(&session.id);
            let remote = self.store.remote_identity(&session.id);

            let dispatch = match self.transport.send(&history, remote.as_deref(), mode).await {
                Ok(d) => d,
                Err(e) => {
                    if e.is_fatal_to_run() {
                        abort.store(true, Ordering::SeqCst);
                        tracing::warn!(case = %case.id, "authentication failure, aborting run");
                    }
                    message = e.to_string();
                    engine.on_failure(TerminationReason::TransportError);
                    break TerminationReason::TransportError;
                }
            };

            let turn_no = turns.len() as u32 + 1;
            if let Err(e) = self.store.record_identity(
                &session.id,
                dispatch.session_identity.clone(),
                turn_no,
                mode,
            ) {
                let r = match e {
                    SessionError::Lost { .. } => TerminationReason::LostSession,
                    SessionError::Closed(_) => TerminationReason::TransportError,
                };
                message = e.to_string();
                engine.on_failure(r);
                break r;
            }

            if let Err(e) = self
                .store
                .append(&session.id, dispatch.turn.received.clone())
            {
                message = e.to_string();
                engine.on_failure(TerminationReason::TransportError);
                break TerminationReason::TransportError;
            }
            turns.push(dispatch.turn);
            engine.await_verdict();

            let output = turns
                .last()
                .map(|t| t.received.content.clone())
                .unwrap_or_default();
            let verdict = self.judges.grade(&output, &case.assertions, &case.vars).await;
            let decision = engine.on_verdict(&verdict, self.strategy.supports_backtracking());
            final_verdict = Some(verdict.clone());

            match decision {
                Decision::Terminate(r) => break r,
                Decision::Backtrack => {
                    tracing::debug!(
                        case = %case.id,
                        backtracks = engine.backtracks_used(),
                        "discarding last exchange and backtracking"
                    );
                    turns.pop();
                    if let Err(e) = self.store.truncate_last_exchange(&session.id) {
                        message = e.to_string();
                        engine.on_failure(TerminationReason::TransportError);
                        break TerminationReason::TransportError;
                    }
                    next = self
                        .strategy
                        .next_message(&self.store.history(&session.id), &verdict);
                }
                Decision::Continue => {
                    next = self
                        .strategy
                        .next_message(&self.store.history(&session.id), &verdict);
                }
            }
        };

        self.finish(case, &session.id, turns, final_verdict, reason, message, started)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        case: &TestCase,
        session_id: &str,
        turns: Vec<Turn>,
        final_verdict: Option<CombinedVerdict>,
        reason: TerminationReason,
        message: String,
        started: Instant,
    ) -> ConversationResult {
        self.store.finalize(session_id);
        tracing::debug!(
            case = %case.id,
            reason = ?reason,
            turns = turns.len(),
            "conversation terminated"
        );
        ConversationResult {
            case_id: case.id.clone(),
            turns,
            final_verdict,
            termination_reason: reason,
            message: if message.is_empty() {
                default_message(reason)
            } else {
                message
            },
            duration_ms: Some(started.elapsed().as_millis() as u64),
        }
    }

    fn clone_for_task(&self) -> Orchestrator {
        Orchestrator {
            store: self.store.clone(),
            transport: self.transport.clone(),
            judges: self.judges.clone(),
            strategy: self.strategy.clone(),
            settings: self.settings.clone(),
        }
    }
}

fn default_message(reason: TerminationReason) -> String {
    match reason {
        TerminationReason::JudgePass => "judge accepted the response",
        TerminationReason::MaxTurns => "turn budget exhausted",
        TerminationReason::MaxBacktracks => "backtrack budget exhausted",
        TerminationReason::TransportError => "transport failure",
        TerminationReason::LostSession => "session identity lost",
        TerminationReason::Timeout => "run deadline exceeded",
    }
    .to_string()
}
