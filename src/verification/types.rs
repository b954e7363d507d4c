//! Core types for the verification loop.

use serde::{Deserialize, Serialize};

/// A named category of unacceptable shortcut in produced work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityViolation {
    MockCode,
    PlaceholderCode,
    #[serde(rename = "HallucinatedAPI")]
    HallucinatedApi,
    IncompleteImpl,
    HardcodedValues,
    EmptyFunction,
    MissingErrors,
    FakeTests,
}

impl QualityViolation {
    pub const ALL: [QualityViolation; 8] = [
        Self::MockCode,
        Self::PlaceholderCode,
        Self::HallucinatedApi,
        Self::IncompleteImpl,
        Self::HardcodedValues,
        Self::EmptyFunction,
        Self::MissingErrors,
        Self::FakeTests,
    ];

    /// Wire name, as used in judge prompts and persisted blobs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MockCode => "MockCode",
            Self::PlaceholderCode => "PlaceholderCode",
            Self::HallucinatedApi => "HallucinatedAPI",
            Self::IncompleteImpl => "IncompleteImpl",
            Self::HardcodedValues => "HardcodedValues",
            Self::EmptyFunction => "EmptyFunction",
            Self::MissingErrors => "MissingErrors",
            Self::FakeTests => "FakeTests",
        }
    }

    /// One-line description for rubrics.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::MockCode => "mock objects or fake implementations instead of real behavior",
            Self::PlaceholderCode => "TODO/FIXME markers, placeholders or stubs",
            Self::HallucinatedApi => "calls to functions, methods or packages that do not exist",
            Self::IncompleteImpl => "only part of the requested behavior is implemented",
            Self::HardcodedValues => "hardcoded values where real inputs or config belong",
            Self::EmptyFunction => "functions with empty or trivial bodies",
            Self::MissingErrors => "errors ignored, swallowed or never checked",
            Self::FakeTests => "tests that assert nothing or always pass",
        }
    }
}

impl std::fmt::Display for QualityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QualityViolation {
    type Err = String;

    /// Case-insensitive; tolerates `snake_case` and `Hallucinated_API` style.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().to_lowercase() == normalized)
            .ok_or_else(|| format!("unknown quality violation: {}", s))
    }
}

/// Kind of corrective action to take before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Research,
    Docs,
    Tool,
    Decompose,
}

/// A directive naming what extra context or tool to fetch before retrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveAction {
    #[serde(rename = "type", alias = "kind")]
    pub kind: ActionKind,
    pub query: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_hint: Option<String>,
}

impl CorrectiveAction {
    pub fn new(kind: ActionKind, query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
            reason: reason.into(),
            shard_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.shard_hint = Some(hint.into());
        self
    }

    /// Hint, with blank strings treated as absent.
    pub fn hint(&self) -> Option<&str> {
        self.shard_hint.as_deref().filter(|h| !h.trim().is_empty())
    }
}

/// Verdict on one attempt.
///
/// # Invariants
/// `success == violations.is_empty()`. The constructors and
/// [`Judgment::normalize`] are the only ways the judge produces values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub success: bool,
    /// In [0, 1]
    pub confidence: f64,
    pub reason: String,
    pub violations: Vec<QualityViolation>,
    pub evidence: Vec<String>,
    pub suggestions: Vec<String>,
    pub corrective_action: Option<CorrectiveAction>,
}

impl Judgment {
    /// A passing verdict.
    pub fn pass(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            success: true,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            violations: Vec::new(),
            evidence: Vec::new(),
            suggestions: Vec::new(),
            corrective_action: None,
        }
    }

    /// A verdict derived from a violation list; success iff the list is empty.
    pub fn from_violations(
        violations: Vec<QualityViolation>,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        let mut judgment = Self::pass(confidence, reason);
        judgment.violations = violations;
        judgment.normalize();
        judgment
    }

    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Restore the success/violation invariant.
    ///
    /// Duplicate violations are dropped. A claimed failure with no named
    /// violation is recorded as `IncompleteImpl`; any violation forces failure.
    pub fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.violations.len());
        self.violations.retain(|v| {
            if seen.contains(v) {
                false
            } else {
                seen.push(*v);
                true
            }
        });
        if !self.success && self.violations.is_empty() {
            self.violations.push(QualityViolation::IncompleteImpl);
        }
        self.success = self.violations.is_empty();
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn violation_names(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.as_str()).collect()
    }
}

/// Advisory recommendation for which shard should run the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSelection {
    pub shard_type: String,
    #[serde(default)]
    pub shard_name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl ShardSelection {
    pub fn new(shard_type: impl Into<String>, confidence: f64, reason: impl Into<String>) -> Self {
        let shard_type = shard_type.into();
        Self {
            shard_name: shard_type.clone(),
            shard_type,
            reason: reason.into(),
            confidence: confidence.clamp(0.0, 1.0),
            alternatives: Vec::new(),
        }
    }
}

/// A task under verification. Lives for one orchestration call.
#[derive(Debug, Clone)]
pub struct VerificationTask {
    original: String,
    text: String,
    pub shard_type: String,
    pub attempt: usize,
    pub max_attempts: usize,
}

impl VerificationTask {
    pub fn new(text: impl Into<String>, shard_type: impl Into<String>, max_attempts: usize) -> Self {
        let text = text.into();
        Self {
            original: text.clone(),
            text,
            shard_type: shard_type.into(),
            attempt: 0,
            max_attempts,
        }
    }

    /// Current (possibly augmented) task text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Task text as the caller supplied it.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Append a block to the task text. Text is never replaced or cut.
    pub fn append(&mut self, block: &str) {
        self.text.push_str(block);
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt + 1 >= self.max_attempts
    }
}

/// Persisted outcome of one judged attempt. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub session_id: String,
    pub turn: u64,
    /// Hash of the task text the attempt actually ran with
    pub task_hash: String,
    /// Hash of the caller's original task text; equal across retries
    pub root_hash: String,
    pub task_text: String,
    pub shard_type: String,
    pub attempt_index: usize,
    pub success: bool,
    pub confidence: f64,
    pub reason: String,
    pub violations: Vec<QualityViolation>,
    pub corrective_action: Option<CorrectiveAction>,
    pub evidence: Vec<String>,
    pub created_at: String,
}

/// Loop state, as observed after each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Attempting(usize),
    Succeeded,
    Escalated,
    Aborted,
}

/// Best-effort output handed to a human when the attempt budget is spent.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub result: String,
    pub judgment: Judgment,
    pub attempts: usize,
    pub shard_type: String,
}

impl Escalation {
    /// Human-readable summary of why verification gave up.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Verification failed after {} attempt(s) on shard '{}': {}",
            self.attempts, self.shard_type, self.judgment.reason
        );
        if !self.judgment.violations.is_empty() {
            out.push_str(&format!(
                "\nViolations: {}",
                self.judgment.violation_names().join(", ")
            ));
        }
        for item in &self.judgment.evidence {
            out.push_str(&format!("\n- {}", item));
        }
        out
    }
}

/// Errors that end an orchestration call.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Shard execution failed; infrastructure, not quality.
    #[error("shard execution failed: {0:#}")]
    Execution(anyhow::Error),

    /// Attempt budget spent without an accepted result.
    #[error("verification escalated after {} attempt(s): {}", .0.attempts, .0.judgment.reason)]
    Escalated(Box<Escalation>),

    #[error("verification cancelled")]
    Cancelled,
}

impl VerifyError {
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalated(_))
    }

    /// Terminal loop state this error ends the call in.
    pub fn state(&self) -> VerificationState {
        match self {
            Self::Escalated(_) => VerificationState::Escalated,
            Self::Execution(_) | Self::Cancelled => VerificationState::Aborted,
        }
    }

    pub fn escalation(&self) -> Option<&Escalation> {
        match self {
            Self::Escalated(e) => Some(e),
            _ => None,
        }
    }
}

/// Accepted output of an orchestration call.
#[derive(Debug, Clone)]
pub struct Verified {
    pub result: String,
    pub judgment: Judgment,
    /// Number of shard executions it took
    pub attempts: usize,
    /// Shard that produced the accepted result
    pub shard_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_names_round_trip_through_from_str() {
        for v in QualityViolation::ALL {
            assert_eq!(v.as_str().parse::<QualityViolation>().unwrap(), v);
        }
        assert_eq!(
            "hallucinated_api".parse::<QualityViolation>().unwrap(),
            QualityViolation::HallucinatedApi
        );
        assert!("SlowCode".parse::<QualityViolation>().is_err());
    }

    #[test]
    fn violation_serializes_with_wire_name() {
        let json = serde_json::to_string(&QualityViolation::HallucinatedApi).unwrap();
        assert_eq!(json, "\"HallucinatedAPI\"");
    }

    #[test]
    fn from_violations_enforces_invariant() {
        let pass = Judgment::from_violations(vec![], 0.9, "clean");
        assert!(pass.success);

        let fail = Judgment::from_violations(
            vec![QualityViolation::MockCode, QualityViolation::MockCode],
            0.9,
            "mocks",
        );
        assert!(!fail.success);
        assert_eq!(fail.violations, vec![QualityViolation::MockCode]);
    }

    #[test]
    fn normalize_fills_unnamed_failure() {
        let mut judgment = Judgment::pass(1.4, "model said no");
        judgment.success = false;
        judgment.normalize();
        assert!(!judgment.success);
        assert_eq!(judgment.violations, vec![QualityViolation::IncompleteImpl]);
        assert_eq!(judgment.confidence, 1.0);
    }

    #[test]
    fn normalize_downgrades_success_with_violations() {
        let mut judgment = Judgment::pass(0.8, "looks fine");
        judgment.violations.push(QualityViolation::FakeTests);
        judgment.normalize();
        assert!(!judgment.success);
    }

    #[test]
    fn corrective_action_accepts_type_or_kind() {
        let a: CorrectiveAction =
            serde_json::from_str(r#"{"type": "docs", "query": "tokio select"}"#).unwrap();
        let b: CorrectiveAction =
            serde_json::from_str(r#"{"kind": "docs", "query": "tokio select"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.kind, ActionKind::Docs);
        assert!(a.hint().is_none());
    }

    #[test]
    fn task_append_only_grows() {
        let mut task = VerificationTask::new("implement cache", "coder", 3);
        let before = task.text().to_string();
        task.append("\n\nmore context");
        assert!(task.text().starts_with(&before));
        assert_eq!(task.original(), "implement cache");
    }

    #[test]
    fn escalation_error_is_distinguishable() {
        let err = VerifyError::Escalated(Box::new(Escalation {
            result: "partial".to_string(),
            judgment: Judgment::from_violations(
                vec![QualityViolation::PlaceholderCode],
                0.6,
                "TODO left in",
            ),
            attempts: 3,
            shard_type: "coder".to_string(),
        }));
        assert!(err.is_escalation());
        assert!(err.to_string().contains("3 attempt"));
        assert!(err.escalation().unwrap().summary().contains("PlaceholderCode"));
        assert!(!VerifyError::Cancelled.is_escalation());
    }
}
