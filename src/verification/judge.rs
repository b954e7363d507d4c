//! Judge - decides whether a shard's output is acceptable.
//!
//! # Strategy
//! 1. Pick a rubric: reviews are scored on the critique, everything else on
//!    the delivered code and tests.
//! 2. Ask the completion capability for a structured verdict.
//! 3. Degrade instead of blocking:
//!    - completion unavailable (not configured) -> basic check
//!    - completion call fails -> optimistic low-confidence pass
//!    - verdict undecodable -> basic check

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::types::{CorrectiveAction, Judgment, QualityViolation, VerifyError};
use crate::config::DEFAULT_JUDGE_CHAR_BUDGET;
use crate::llm::Completer;
use crate::util::{extract_json_object, strip_code_fence, truncate_chars};

/// Confidence of the verdict used when the judge itself is unreachable.
pub const OPTIMISTIC_CONFIDENCE: f64 = 0.3;

/// Confidence of the deterministic substring check.
pub const BASIC_CHECK_CONFIDENCE: f64 = 0.6;

const REVIEW_KEYWORDS: [&str; 8] = [
    "review",
    "audit",
    "analyze",
    "security_scan",
    "inspect",
    "examine",
    "assess",
    "evaluate",
];

/// Markers of code that aborts with "not implemented".
const NOT_IMPLEMENTED_MARKERS: [&str; 5] = [
    "not implemented",
    "unimplemented!",
    "notimplementederror",
    "errnotimplemented",
    "panic(\"not implemented",
];

/// Judges a (task, result) pair under a fixed rubric.
///
/// `mode` comes from the caller's original task text, never from the
/// retry-augmented text, so feedback and gathered context cannot flip it.
///
/// # Errors
/// Only [`VerifyError::Cancelled`]; every other failure degrades to a verdict.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(
        &self,
        cancel: &CancellationToken,
        mode: JudgeMode,
        task: &str,
        result: &str,
    ) -> Result<Judgment, VerifyError>;
}

/// What the judge is scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeMode {
    /// The output is a critique of other code
    Review,
    /// The output is code or tests
    Implementation,
}

impl JudgeMode {
    /// Keyword heuristic over the task text.
    pub fn detect(task: &str) -> Self {
        let lower = task.trim().to_lowercase();
        if REVIEW_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::Review
        } else {
            Self::Implementation
        }
    }

    fn rubric(&self) -> String {
        let taxonomy: String = QualityViolation::ALL
            .iter()
            .map(|v| format!("- {}: {}\n", v.as_str(), v.describe()))
            .collect();

        let scope = match self {
            Self::Review => {
                "You are judging a code REVIEW produced by an engineering agent.\n\
                 Score the quality of the critique itself, not the reviewed code.\n\
                 A review that correctly reports that the reviewed code is incomplete, \
                 mocked or buggy is a SUCCESS.\n\
                 Fail the review only when the review is shallow, generic, cites code or \
                 APIs that are not there, or misses what the task asked it to examine. \
                 Map those failures onto the categories below (IncompleteImpl for shallow \
                 or partial reviews, HallucinatedAPI for invented findings, PlaceholderCode \
                 for boilerplate)."
            }
            Self::Implementation => {
                "You are judging code and tests delivered by an engineering agent.\n\
                 Fail the work if it takes any of the shortcuts below. Real, working \
                 behavior is the only acceptable outcome."
            }
        };

        format!(
            "{scope}\n\nViolation categories:\n{taxonomy}\n\
             Respond ONLY with a JSON object:\n\
             {{\n  \"success\": true/false,\n  \"confidence\": 0.0-1.0,\n  \"reason\": \"one sentence\",\n  \
             \"violations\": [\"CategoryName\", ...],\n  \"evidence\": [\"quoted snippet or observation\", ...],\n  \
             \"suggestions\": [\"concrete fix\", ...],\n  \
             \"corrective_action\": {{\"type\": \"research|docs|tool|decompose\", \"query\": \"...\", \"reason\": \"...\", \"shard_hint\": \"optional shard name\"}} or null\n}}\n\
             success must be true exactly when violations is empty."
        )
    }
}

/// Verdict as the model returns it.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    success: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    violations: Vec<String>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default, alias = "correctiveAction")]
    corrective_action: Option<CorrectiveAction>,
}

impl RawVerdict {
    fn into_judgment(self) -> Judgment {
        let violations = self
            .violations
            .iter()
            .filter_map(|name| match name.parse::<QualityViolation>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!("Dropping verdict entry: {}", e);
                    None
                }
            })
            .collect();

        let mut judgment = Judgment {
            success: self.success,
            confidence: self.confidence.unwrap_or(0.5),
            reason: self.reason,
            violations,
            evidence: self.evidence,
            suggestions: self.suggestions,
            corrective_action: self.corrective_action,
        };
        judgment.normalize();
        judgment
    }
}

/// Decode a verdict, tolerating code fences and surrounding prose.
pub fn decode_verdict(response: &str) -> Option<Judgment> {
    let body = strip_code_fence(response);
    let raw = serde_json::from_str::<RawVerdict>(body)
        .ok()
        .or_else(|| extract_json_object(body).and_then(|o| serde_json::from_str(o).ok()))?;
    Some(raw.into_judgment())
}

/// Deterministic substring check used when no verdict is available.
///
/// Pure: the same text always yields the same judgment.
pub fn basic_check(result: &str) -> Judgment {
    let lower = result.to_lowercase();
    let mut violations = Vec::new();
    let mut evidence = Vec::new();

    let mut flag = |hit: bool, violation: QualityViolation, note: &str| {
        if hit {
            if !violations.contains(&violation) {
                violations.push(violation);
            }
            evidence.push(note.to_string());
        }
    };

    flag(
        lower.contains("todo") || lower.contains("fixme"),
        QualityViolation::PlaceholderCode,
        "contains TODO/FIXME marker",
    );
    flag(
        lower.contains("mock"),
        QualityViolation::MockCode,
        "mentions mock implementation",
    );
    flag(
        NOT_IMPLEMENTED_MARKERS.iter().any(|m| lower.contains(m)),
        QualityViolation::IncompleteImpl,
        "contains not-implemented marker",
    );
    flag(
        lower.contains("placeholder") || lower.contains("stub"),
        QualityViolation::PlaceholderCode,
        "contains placeholder or stub",
    );

    let reason = if violations.is_empty() {
        "Basic check found no quality markers".to_string()
    } else {
        format!(
            "Basic check found: {}",
            violations
                .iter()
                .map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    Judgment::from_violations(violations, BASIC_CHECK_CONFIDENCE, reason).with_evidence(evidence)
}

/// Judge backed by the completion capability.
pub struct LlmJudge {
    completer: Option<Arc<dyn Completer>>,
    char_budget: usize,
}

impl LlmJudge {
    /// Create a judge. `None` runs the basic check only.
    pub fn new(completer: Option<Arc<dyn Completer>>) -> Self {
        Self {
            completer,
            char_budget: DEFAULT_JUDGE_CHAR_BUDGET,
        }
    }

    /// Cap on result characters shown to the model.
    pub fn with_char_budget(mut self, char_budget: usize) -> Self {
        self.char_budget = char_budget;
        self
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(
        &self,
        cancel: &CancellationToken,
        mode: JudgeMode,
        task: &str,
        result: &str,
    ) -> Result<Judgment, VerifyError> {
        let Some(completer) = &self.completer else {
            tracing::debug!("No completion capability; using basic check");
            return Ok(basic_check(result));
        };

        let shown = truncate_chars(result, self.char_budget);
        let user = format!("Task:\n{}\n\nShard output:\n{}", task, shown);

        let response = match completer.complete(cancel, &mode.rubric(), &user).await {
            Ok(response) => response,
            Err(_) if cancel.is_cancelled() => return Err(VerifyError::Cancelled),
            Err(e) => {
                tracing::warn!("Judge unreachable, accepting with low confidence: {:#}", e);
                return Ok(Judgment::pass(
                    OPTIMISTIC_CONFIDENCE,
                    format!("Judge unavailable ({}); accepted without review", e),
                ));
            }
        };

        match decode_verdict(&response) {
            Some(judgment) => {
                tracing::debug!(
                    ?mode,
                    success = judgment.success,
                    confidence = judgment.confidence,
                    violations = ?judgment.violation_names(),
                    "Judge verdict"
                );
                Ok(judgment)
            }
            None => {
                tracing::warn!("Judge verdict undecodable; falling back to basic check");
                Ok(basic_check(result))
            }
        }
    }
}
