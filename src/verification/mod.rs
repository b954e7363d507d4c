//! Verified shard execution.
//!
//! ## Flow
//! ```text
//! RetryOrchestrator ──► ShardExecutor ──► Judge
//!        ▲                                  │ failure
//!        │                                  ▼
//!   rewrite task ◄── Advisor ◄── ContextGatherer ◄── corrective::resolve
//! ```
//! Every judged attempt is handed to the [`OutcomeRecorder`].

pub mod advisor;
pub mod corrective;
pub mod gather;
pub mod judge;
pub mod orchestrator;
pub mod recorder;
pub mod types;

pub use advisor::{fallback_selection, Advisor, LlmAdvisor};
pub use corrective::resolve;
pub use gather::ContextGatherer;
pub use judge::{basic_check, decode_verdict, Judge, JudgeMode, LlmJudge};
pub use orchestrator::RetryOrchestrator;
pub use recorder::{
    InMemoryVerificationStore, OutcomeRecorder, SessionTurn, SqliteVerificationStore,
    VerificationStore,
};
pub use types::{
    ActionKind, CorrectiveAction, Escalation, Judgment, QualityViolation, ShardSelection,
    VerificationRecord, VerificationState, VerificationTask, Verified, VerifyError,
};
