//! Corrective action resolver.
//!
//! Turns a failed judgment into the action the gatherer should execute. A
//! corrective action proposed by the judge wins; otherwise one is derived
//! from the violation set.

use super::types::{ActionKind, CorrectiveAction, Judgment, QualityViolation};

/// Longest task excerpt embedded in a derived query.
const QUERY_TASK_CHARS: usize = 160;

/// Resolve the corrective action for a failed attempt.
///
/// Returns `None` for passing judgments.
pub fn resolve(judgment: &Judgment, original_task: &str) -> Option<CorrectiveAction> {
    if judgment.success {
        return None;
    }
    if let Some(action) = judgment
        .corrective_action
        .as_ref()
        .filter(|a| !a.query.trim().is_empty())
    {
        return Some(action.clone());
    }
    Some(derive(&judgment.violations, &judgment.reason, original_task))
}

/// Map a violation set onto an action kind and query.
fn derive(violations: &[QualityViolation], reason: &str, original_task: &str) -> CorrectiveAction {
    use QualityViolation::*;

    let subject = task_subject(original_task);
    let has = |v: QualityViolation| violations.contains(&v);

    let (kind, query) = if has(HallucinatedApi) {
        (ActionKind::Docs, format!("correct API usage for {}", subject))
    } else if has(FakeTests) {
        (
            ActionKind::Research,
            format!("how to write meaningful tests for {}", subject),
        )
    } else if !violations.is_empty()
        && violations
            .iter()
            .all(|v| matches!(v, IncompleteImpl | EmptyFunction))
    {
        (ActionKind::Decompose, subject)
    } else if has(MissingErrors) {
        (
            ActionKind::Research,
            format!("error handling practices for {}", subject),
        )
    } else {
        (
            ActionKind::Research,
            format!("complete working implementation of {}", subject),
        )
    };

    let names: Vec<&str> = violations.iter().map(|v| v.as_str()).collect();
    let reason = if reason.trim().is_empty() {
        format!("violations: {}", names.join(", "))
    } else {
        format!("{} (violations: {})", reason.trim(), names.join(", "))
    };

    CorrectiveAction::new(kind, query, reason)
}

/// First non-empty line of the task, bounded.
fn task_subject(task: &str) -> String {
    let line = task
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("the task");
    line.chars().take(QUERY_TASK_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(violations: Vec<QualityViolation>) -> Judgment {
        Judgment::from_violations(violations, 0.8, "not acceptable")
    }

    #[test]
    fn passing_judgment_needs_no_action() {
        let judgment = Judgment::pass(0.9, "fine");
        assert!(resolve(&judgment, "implement cache").is_none());
    }

    #[test]
    fn judge_proposed_action_wins() {
        let mut judgment = failed(vec![QualityViolation::MockCode]);
        judgment.corrective_action = Some(
            CorrectiveAction::new(ActionKind::Tool, "sqlite_migrator", "need migrations")
                .with_hint("database_specialist"),
        );
        let action = resolve(&judgment, "add migrations").unwrap();
        assert_eq!(action.kind, ActionKind::Tool);
        assert_eq!(action.hint(), Some("database_specialist"));
    }

    #[test]
    fn blank_judge_action_is_replaced() {
        let mut judgment = failed(vec![QualityViolation::HallucinatedApi]);
        judgment.corrective_action = Some(CorrectiveAction::new(ActionKind::Tool, "  ", ""));
        let action = resolve(&judgment, "call the S3 API").unwrap();
        assert_eq!(action.kind, ActionKind::Docs);
    }

    #[test]
    fn hallucinated_api_maps_to_docs() {
        let action = resolve(
            &failed(vec![QualityViolation::MockCode, QualityViolation::HallucinatedApi]),
            "integrate the stripe client\nmore detail",
        )
        .unwrap();
        assert_eq!(action.kind, ActionKind::Docs);
        assert_eq!(action.query, "correct API usage for integrate the stripe client");
        assert!(action.reason.contains("HallucinatedAPI"));
    }

    #[test]
    fn incomplete_only_maps_to_decompose() {
        let action = resolve(
            &failed(vec![
                QualityViolation::IncompleteImpl,
                QualityViolation::EmptyFunction,
            ]),
            "build the scheduler",
        )
        .unwrap();
        assert_eq!(action.kind, ActionKind::Decompose);
        assert_eq!(action.query, "build the scheduler");
    }

    #[test]
    fn fake_tests_map_to_research() {
        let action = resolve(&failed(vec![QualityViolation::FakeTests]), "test the parser").unwrap();
        assert_eq!(action.kind, ActionKind::Research);
        assert!(action.query.contains("meaningful tests"));
    }

    #[test]
    fn other_violations_map_to_research() {
        let action =
            resolve(&failed(vec![QualityViolation::HardcodedValues]), "read config").unwrap();
        assert_eq!(action.kind, ActionKind::Research);
    }
}
