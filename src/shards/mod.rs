//! Shard roster and dispatch.
//!
//! Shards are the external workers that perform coding subtasks. This crate
//! never looks inside them: it hands a shard type and task text to a
//! [`ShardExecutor`] and gets free text back.
//!
//! [`ShardRegistry`] is a capability-indexed table (shard type -> handler).
//! It backs both execution and roster discovery, so the shards the advisor
//! may recommend are exactly the shards the orchestrator can run.

mod registry;

pub use registry::ShardRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Built-in shard that writes code.
pub const CODER: &str = "coder";
/// Built-in shard that reviews code.
pub const REVIEWER: &str = "reviewer";
/// Built-in shard that writes and runs tests.
pub const TESTER: &str = "tester";
/// Built-in shard that researches APIs and practices.
pub const RESEARCHER: &str = "researcher";

/// Capability class of a shard, used to group the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardClass {
    /// Ships with the platform (coder, reviewer, tester, researcher)
    BuiltIn,
    /// Pre-trained with domain knowledge (browser automation, databases, ...)
    Specialist,
    /// User-defined general-purpose shard
    General,
}

impl ShardClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BuiltIn => "Built-in",
            Self::Specialist => "Pre-trained specialist",
            Self::General => "General-purpose",
        }
    }
}

/// Roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub name: String,
    pub class: ShardClass,
}

impl ShardInfo {
    pub fn new(name: impl Into<String>, class: ShardClass) -> Self {
        Self {
            name: name.into(),
            class,
        }
    }
}

/// A single shard implementation.
#[async_trait]
pub trait ShardHandler: Send + Sync {
    /// Run `task` and return the shard's free-text output.
    async fn run(&self, cancel: &CancellationToken, task: &str) -> anyhow::Result<String>;
}

/// Worker-execution substrate.
///
/// # Errors
/// An `Err` from [`ShardExecutor::execute`] is an infrastructure failure
/// (shard missing, crashed, cancelled). Poor-quality output is `Ok`.
#[async_trait]
pub trait ShardExecutor: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        shard_type: &str,
        task: &str,
    ) -> anyhow::Result<String>;

    /// Whether `shard_type` can be dispatched.
    fn can_execute(&self, shard_type: &str) -> bool;
}

/// Worker-roster discovery.
pub trait ShardRoster: Send + Sync {
    fn list_shards(&self) -> Vec<ShardInfo>;
}
