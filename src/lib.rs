//! # shard_verify
//!
//! Verification and retry core for a multi-agent coding platform.
//!
//! A task is handed to a shard (a specialized worker), the output is judged
//! for quality violations, and failures are retried with corrective context,
//! possibly on a different shard, until the output passes or the attempt
//! budget is spent and the task escalates to a human.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │        RetryOrchestrator         │
//!        │  (execute, judge, correct, loop) │
//!        └───────┬──────────────┬───────────┘
//!                │              │
//!                ▼              ▼
//!       ┌──────────────┐  ┌───────────┐
//!       │ShardRegistry │  │ LlmJudge  │──► OpenRouter
//!       └──────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//! - `verification`: judge, resolver, gatherer, advisor, orchestrator, recorder
//! - `shards`: shard roster and dispatch table
//! - `llm`: OpenRouter client and the completion capability
//! - `docs`: documentation lookup
//! - `synthesis`: tool-synthesis contract

pub mod config;
pub mod docs;
pub mod llm;
pub mod shards;
pub mod synthesis;
pub mod util;
pub mod verification;

pub use config::Config;
pub use verification::{RetryOrchestrator, VerifyError};
