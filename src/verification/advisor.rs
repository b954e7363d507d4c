//! Reassignment advisor - recommends the shard for the next attempt.
//!
//! Advisory only: the orchestrator confirms the recommended shard is
//! executable before switching to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{Judgment, QualityViolation, ShardSelection, VerifyError};
use crate::llm::Completer;
use crate::shards::{ShardRoster, RESEARCHER, REVIEWER, TESTER};
use crate::util::{extract_json_object, strip_code_fence};

/// Confidence for keeping the original shard when nothing points elsewhere.
pub const KEEP_SHARD_CONFIDENCE: f64 = 0.6;

const ADVISOR_PROMPT: &str = r#"You route failed coding tasks to the shard most likely to succeed on the next attempt.

You are given the shard that failed, the quality violations a reviewer found, the failure reason and evidence, and the available shards grouped by capability class.

Pick exactly one shard from the list. Prefer specialists whose domain matches the task. Keep the original shard if extra context alone is likely to fix the problem.

Respond with ONLY a JSON object:
{
  "shard_type": "<shard from the list>",
  "shard_name": "<display name>",
  "reason": "<one sentence>",
  "confidence": <0.0 to 1.0>,
  "alternatives": ["<other suitable shards>"]
}"#;

/// Recommends which shard should handle the next attempt.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// # Errors
    /// Only [`VerifyError::Cancelled`]; every other failure degrades to the
    /// fallback table.
    async fn advise(
        &self,
        cancel: &CancellationToken,
        task: &str,
        original_shard: &str,
        judgment: &Judgment,
    ) -> Result<ShardSelection, VerifyError>;
}

/// Fixed routing table used when the model path is unavailable.
pub fn fallback_selection(original_shard: &str, judgment: &Judgment) -> ShardSelection {
    let has = |v: QualityViolation| judgment.violations.contains(&v);

    if has(QualityViolation::HallucinatedApi) {
        ShardSelection::new(
            RESEARCHER,
            0.8,
            "Hallucinated API calls; a research shard can confirm the real API",
        )
    } else if has(QualityViolation::MissingErrors) {
        ShardSelection::new(
            REVIEWER,
            0.7,
            "Missing error handling; a review shard catches unhandled failure paths",
        )
    } else if has(QualityViolation::FakeTests) {
        ShardSelection::new(
            TESTER,
            0.85,
            "Tests do not exercise behavior; a test shard writes real assertions",
        )
    } else {
        ShardSelection::new(
            original_shard,
            KEEP_SHARD_CONFIDENCE,
            "Keeping the original shard; additional context may be enough",
        )
    }
}

/// Advisor backed by the completion capability and the shard roster.
pub struct LlmAdvisor {
    completer: Option<Arc<dyn Completer>>,
    roster: Option<Arc<dyn ShardRoster>>,
}

impl LlmAdvisor {
    pub fn new(
        completer: Option<Arc<dyn Completer>>,
        roster: Option<Arc<dyn ShardRoster>>,
    ) -> Self {
        Self { completer, roster }
    }

    fn build_prompt(
        roster: &dyn ShardRoster,
        task: &str,
        original_shard: &str,
        judgment: &Judgment,
    ) -> Option<String> {
        let shards = roster.list_shards();
        if shards.is_empty() {
            return None;
        }

        let mut groups: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for shard in shards {
            groups.entry(shard.class.label()).or_default().push(shard.name);
        }

        let mut prompt = format!(
            "Task:\n{}\n\nFailed shard: {}\nFailure reason: {}\n",
            task, original_shard, judgment.reason
        );
        if judgment.violations.is_empty() {
            prompt.push_str("Violations: none reported\n");
        } else {
            prompt.push_str("Violations:\n");
            for v in &judgment.violations {
                prompt.push_str(&format!("- {}: {}\n", v, v.describe()));
            }
        }
        if !judgment.evidence.is_empty() {
            prompt.push_str("Evidence:\n");
            for item in &judgment.evidence {
                prompt.push_str(&format!("- {}\n", item));
            }
        }
        prompt.push_str("\nAvailable shards:\n");
        for (label, names) in groups {
            prompt.push_str(&format!("{}: {}\n", label, names.join(", ")));
        }
        Some(prompt)
    }
}

/// Decode a model recommendation, tolerating fences and surrounding prose.
fn decode_selection(response: &str) -> Option<ShardSelection> {
    let body = strip_code_fence(response);
    let json = extract_json_object(body).unwrap_or(body);
    let mut selection: ShardSelection = serde_json::from_str(json).ok()?;
    selection.shard_type = selection.shard_type.trim().to_string();
    if selection.shard_type.is_empty() {
        return None;
    }
    if selection.shard_name.trim().is_empty() {
        selection.shard_name = selection.shard_type.clone();
    }
    selection.confidence = selection.confidence.clamp(0.0, 1.0);
    Some(selection)
}

#[async_trait]
impl Advisor for LlmAdvisor {
    async fn advise(
        &self,
        cancel: &CancellationToken,
        task: &str,
        original_shard: &str,
        judgment: &Judgment,
    ) -> Result<ShardSelection, VerifyError> {
        let (Some(completer), Some(roster)) = (&self.completer, &self.roster) else {
            return Ok(fallback_selection(original_shard, judgment));
        };
        let Some(prompt) = Self::build_prompt(roster.as_ref(), task, original_shard, judgment)
        else {
            return Ok(fallback_selection(original_shard, judgment));
        };

        let response = match completer.complete(cancel, ADVISOR_PROMPT, &prompt).await {
            Ok(response) => response,
            Err(_) if cancel.is_cancelled() => return Err(VerifyError::Cancelled),
            Err(e) => {
                tracing::warn!("Advisor model call failed, using routing table: {:#}", e);
                return Ok(fallback_selection(original_shard, judgment));
            }
        };

        match decode_selection(&response) {
            Some(selection) => {
                tracing::debug!(
                    shard = %selection.shard_type,
                    confidence = selection.confidence,
                    "Advisor recommendation"
                );
                Ok(selection)
            }
            None => {
                tracing::warn!("Advisor response undecodable, using routing table");
                Ok(fallback_selection(original_shard, judgment))
            }
        }
    }
}
