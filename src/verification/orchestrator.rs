//! Retry orchestrator - the verification state machine.
//!
//! ```text
//! Attempting(i) --judged success-----------------> Succeeded
//! Attempting(i) --judged failure, i < max-1------> Attempting(i+1)
//! Attempting(max-1) --judged failure-------------> Escalated
//! Attempting(i) --execution error / cancelled----> Aborted
//! ```
//!
//! Task text only ever grows between attempts: each retry appends the failure
//! feedback and gathered context to what the previous attempt saw.
//!
//! The session/turn pair is the only state shared between concurrent calls.
//! It is snapshotted at the start of each call; everything else is local.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::advisor::{Advisor, LlmAdvisor};
use super::corrective::resolve;
use super::gather::ContextGatherer;
use super::judge::{Judge, JudgeMode, LlmJudge};
use super::recorder::{
    OutcomeRecorder, SessionTurn, SqliteVerificationStore, VerificationStore,
};
use super::types::{
    Escalation, Judgment, VerificationState, VerificationTask, Verified, VerifyError,
};
use crate::config::{Config, VerifierSettings, DEFAULT_MAX_ATTEMPTS};
use crate::docs::{Context7Docs, DocsLookup};
use crate::llm::{Completer, ModelCompleter, OpenRouterClient};
use crate::shards::{ShardExecutor, ShardRegistry, ShardRoster};

/// Fixed requirements appended to every rewritten task.
const RETRY_CHECKLIST: &[&str] = &[
    "No mock, stub, or placeholder code",
    "No TODO or FIXME markers",
    "No hallucinated API calls; use only functions and methods that exist",
    "Implement the actual behavior end to end",
];

/// Outcome of an attempt that did not error.
enum Step {
    Accepted(Verified),
    Retry,
}

/// Drives execute -> judge -> correct -> retry until success or escalation.
pub struct RetryOrchestrator {
    executor: Arc<dyn ShardExecutor>,
    judge: Arc<dyn Judge>,
    advisor: Arc<dyn Advisor>,
    gatherer: Arc<ContextGatherer>,
    recorder: OutcomeRecorder,
    settings: VerifierSettings,
    session: Arc<RwLock<SessionTurn>>,
}

impl RetryOrchestrator {
    /// Orchestrator with the table-driven advisor, no context collaborators
    /// and no persistence.
    pub fn new(executor: Arc<dyn ShardExecutor>, judge: Arc<dyn Judge>) -> Self {
        Self {
            executor,
            judge,
            advisor: Arc::new(LlmAdvisor::new(None, None)),
            gatherer: Arc::new(ContextGatherer::new()),
            recorder: OutcomeRecorder::default(),
            settings: VerifierSettings::default(),
            session: Arc::new(RwLock::new(SessionTurn::new(Uuid::new_v4().to_string(), 0))),
        }
    }

    /// Wire every collaborator from configuration around a shard registry.
    ///
    /// Without an OpenRouter key the judge runs its basic check and the
    /// advisor uses its routing table.
    pub async fn from_config(config: &Config, shards: Arc<ShardRegistry>) -> anyhow::Result<Self> {
        if shards.is_empty() {
            anyhow::bail!("No shards registered; nothing to verify against");
        }
        tracing::info!(shards = shards.len(), "Shard registry loaded");

        let completer: Option<Arc<dyn Completer>> = match &config.api_key {
            Some(key) => {
                let llm = Arc::new(OpenRouterClient::new(key.clone()));
                Some(Arc::new(ModelCompleter::new(llm, config.judge_model.clone())))
            }
            None => {
                tracing::warn!("OPENROUTER_API_KEY not set; judge falls back to basic checks");
                None
            }
        };
        let roster: Arc<dyn ShardRoster> = shards.clone();

        let mut gatherer = ContextGatherer::new()
            .with_executor(shards.clone())
            .with_roster(roster.clone())
            .with_char_budget(config.verifier.context_char_budget);
        if let Some(docs) = Context7Docs::from_config(&config.docs)? {
            let docs: Arc<dyn DocsLookup> = Arc::new(docs);
            gatherer = gatherer.with_docs(docs);
        }

        let store: Option<Arc<dyn VerificationStore>> = match &config.db_path {
            Some(path) => {
                let store = SqliteVerificationStore::new(path).await?;
                tracing::info!(path = %store.path().display(), "Verification records persisted");
                Some(Arc::new(store))
            }
            None => None,
        };

        let judge = LlmJudge::new(completer.clone())
            .with_char_budget(config.verifier.judge_char_budget);

        Ok(Self::new(shards, Arc::new(judge))
            .with_advisor(Arc::new(LlmAdvisor::new(completer, Some(roster))))
            .with_gatherer(gatherer)
            .with_recorder(OutcomeRecorder::new(store))
            .with_settings(config.verifier.clone()))
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_gatherer(mut self, gatherer: ContextGatherer) -> Self {
        self.gatherer = Arc::new(gatherer);
        self
    }

    pub fn with_recorder(mut self, recorder: OutcomeRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_settings(mut self, settings: VerifierSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start a new session; the turn counter resets.
    pub async fn set_session(&self, session_id: impl Into<String>) {
        *self.session.write().await = SessionTurn::new(session_id, 0);
    }

    /// Advance the turn counter and return the new turn.
    pub async fn next_turn(&self) -> u64 {
        let mut session = self.session.write().await;
        session.turn += 1;
        session.turn
    }

    /// Current session/turn pair.
    pub async fn session(&self) -> SessionTurn {
        self.session.read().await.clone()
    }

    /// Run `task_text` on `shard_type` until the judge accepts it or the
    /// attempt budget is spent. `max_attempts == 0` uses the configured budget.
    ///
    /// # Errors
    /// - [`VerifyError::Escalated`] with the final result and judgment when no
    ///   attempt passed
    /// - [`VerifyError::Execution`] when the shard itself failed
    /// - [`VerifyError::Cancelled`] when `cancel` fired
    pub async fn verify(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        shard_type: &str,
        max_attempts: usize,
    ) -> Result<Verified, VerifyError> {
        let max_attempts = match (max_attempts, self.settings.max_attempts) {
            (0, 0) => DEFAULT_MAX_ATTEMPTS,
            (0, configured) => configured,
            (n, _) => n,
        };
        let scope = self.session().await;
        let mode = JudgeMode::detect(task_text);
        let mut task = VerificationTask::new(task_text, shard_type, max_attempts);

        tracing::info!(
            session = %scope.session_id,
            turn = scope.turn,
            shard = %shard_type,
            max_attempts,
            ?mode,
            "Starting verified execution"
        );

        loop {
            let span = tracing::info_span!(
                "verify_attempt",
                attempt = task.attempt,
                shard = %task.shard_type
            );
            tracing::debug!(state = ?VerificationState::Attempting(task.attempt), "Verification attempt");

            match self.attempt(cancel, &scope, mode, &mut task).instrument(span).await {
                Ok(Step::Accepted(verified)) => {
                    tracing::debug!(state = ?VerificationState::Succeeded, attempts = verified.attempts);
                    return Ok(verified);
                }
                Ok(Step::Retry) => continue,
                Err(e) => {
                    tracing::info!(state = ?e.state(), "Verification ended: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        scope: &SessionTurn,
        mode: JudgeMode,
        task: &mut VerificationTask,
    ) -> Result<Step, VerifyError> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        let result = match self
            .executor
            .execute(cancel, &task.shard_type, task.text())
            .await
        {
            Ok(result) => result,
            Err(_) if cancel.is_cancelled() => return Err(VerifyError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    attempt = task.attempt,
                    shard = %task.shard_type,
                    "Shard execution failed: {:#}",
                    e
                );
                return Err(VerifyError::Execution(e));
            }
        };

        let mut judgment = self.judge.judge(cancel, mode, task.text(), &result).await?;
        judgment.normalize();
        if !judgment.success {
            judgment.corrective_action = resolve(&judgment, task.original());
        }

        self.recorder.record(cancel, scope, task, &judgment).await?;

        let attempts = task.attempt + 1;
        if judgment.success {
            tracing::info!(
                attempts,
                shard = %task.shard_type,
                confidence = judgment.confidence,
                "Verification passed"
            );
            return Ok(Step::Accepted(Verified {
                result,
                judgment,
                attempts,
                shard_type: task.shard_type.clone(),
            }));
        }

        tracing::info!(
            attempt = task.attempt,
            shard = %task.shard_type,
            violations = ?judgment.violation_names(),
            "Verification failed: {}",
            judgment.reason
        );

        if task.is_last_attempt() {
            return Err(VerifyError::Escalated(Box::new(Escalation {
                result,
                judgment,
                attempts,
                shard_type: task.shard_type.clone(),
            })));
        }

        let selection = self
            .advisor
            .advise(cancel, task.original(), &task.shard_type, &judgment)
            .await?;
        if selection.shard_type != task.shard_type {
            if self.executor.can_execute(&selection.shard_type) {
                tracing::info!(
                    from = %task.shard_type,
                    to = %selection.shard_type,
                    confidence = selection.confidence,
                    "Reassigning shard: {}",
                    selection.reason
                );
                task.shard_type = selection.shard_type;
            } else {
                tracing::debug!(
                    shard = %selection.shard_type,
                    "Advisor picked a shard that cannot execute; keeping current"
                );
            }
        }

        let context = match &judgment.corrective_action {
            Some(action) => self.gatherer.gather(cancel, action).await?,
            None => String::new(),
        };

        task.append(&feedback_block(attempts, &judgment, &context));
        task.attempt += 1;

        if !self.settings.backoff.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
                _ = tokio::time::sleep(self.settings.backoff) => {}
            }
        }

        Ok(Step::Retry)
    }
}

/// Block appended to the task text before a retry.
fn feedback_block(attempt: usize, judgment: &Judgment, context: &str) -> String {
    let mut block = format!(
        "\n\n--- Attempt {} failed verification ---\nReason: {}\n",
        attempt, judgment.reason
    );

    if !judgment.violations.is_empty() {
        block.push_str("Violations:\n");
        for v in &judgment.violations {
            block.push_str(&format!("- {}: {}\n", v, v.describe()));
        }
    }
    if !judgment.evidence.is_empty() {
        block.push_str("Evidence:\n");
        for item in &judgment.evidence {
            block.push_str(&format!("- {}\n", item));
        }
    }
    if !context.trim().is_empty() {
        block.push_str("\nAdditional context:\n");
        block.push_str(context.trim_end());
        block.push('\n');
    }

    block.push_str("\nRequirements for this attempt:\n");
    for item in RETRY_CHECKLIST {
        block.push_str(&format!("- {}\n", item));
    }
    block
}
