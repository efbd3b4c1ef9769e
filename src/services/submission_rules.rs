use serde::Serialize;

use crate::db::types::{NodeState, UserRole};

/// Typed rejection for an incomplete submit action: everything the student
/// still has to provide, in one response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct Incomplete {
    pub(crate) missing_slots: Vec<String>,
    pub(crate) missing_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct SlotStatus {
    pub(crate) key: String,
    pub(crate) required: bool,
    pub(crate) has_active_attachment: bool,
}

/// Per-role transition table. Students drive the forward path, reviewers
/// decide submitted work, admins may force any state (debug/ops path).
pub(crate) fn transition_allowed(role: UserRole, from: NodeState, to: NodeState) -> bool {
    match role {
        UserRole::Admin => from != to,
        UserRole::Student => matches!(
            (from, to),
            (NodeState::Todo, NodeState::InProgress)
                | (NodeState::InProgress, NodeState::Submitted)
                | (NodeState::NeedsChanges, NodeState::InProgress)
        ),
        UserRole::Reviewer => matches!(
            (from, to),
            (NodeState::Submitted, NodeState::Done)
                | (NodeState::Submitted, NodeState::NeedsChanges)
        ),
    }
}

/// First student write to a node picks it up: `todo` and `needs_changes`
/// both move to `in_progress`, anything else stays put.
pub(crate) fn state_after_write(current: NodeState) -> NodeState {
    match current {
        NodeState::Todo | NodeState::NeedsChanges => NodeState::InProgress,
        other => other,
    }
}

/// Submit gate: every required slot needs an active attachment and every
/// required form field a non-empty value in the latest revision.
pub(crate) fn check_completeness(
    required_fields: &[String],
    form_data: Option<&serde_json::Value>,
    slots: &[SlotStatus],
) -> Result<(), Incomplete> {
    let missing_slots: Vec<String> = slots
        .iter()
        .filter(|slot| slot.required && !slot.has_active_attachment)
        .map(|slot| slot.key.clone())
        .collect();

    let missing_fields: Vec<String> = required_fields
        .iter()
        .filter(|key| !field_present(form_data, key))
        .cloned()
        .collect();

    if missing_slots.is_empty() && missing_fields.is_empty() {
        Ok(())
    } else {
        Err(Incomplete { missing_slots, missing_fields })
    }
}

fn field_present(form_data: Option<&serde_json::Value>, key: &str) -> bool {
    let Some(value) = form_data.and_then(|data| data.get(key)) else {
        return false;
    };
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(text) => !text.trim().is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(key: &str, required: bool, has_active_attachment: bool) -> SlotStatus {
        SlotStatus { key: key.to_string(), required, has_active_attachment }
    }

    #[test]
    fn student_forward_path() {
        assert!(transition_allowed(UserRole::Student, NodeState::Todo, NodeState::InProgress));
        assert!(transition_allowed(
            UserRole::Student,
            NodeState::InProgress,
            NodeState::Submitted
        ));
        assert!(transition_allowed(
            UserRole::Student,
            NodeState::NeedsChanges,
            NodeState::InProgress
        ));
    }

    #[test]
    fn student_cannot_approve_own_work() {
        assert!(!transition_allowed(UserRole::Student, NodeState::Submitted, NodeState::Done));
        assert!(!transition_allowed(UserRole::Student, NodeState::Todo, NodeState::Done));
        assert!(!transition_allowed(UserRole::Student, NodeState::Done, NodeState::InProgress));
    }

    #[test]
    fn reviewer_decides_submitted_work_only() {
        assert!(transition_allowed(UserRole::Reviewer, NodeState::Submitted, NodeState::Done));
        assert!(transition_allowed(
            UserRole::Reviewer,
            NodeState::Submitted,
            NodeState::NeedsChanges
        ));
        assert!(!transition_allowed(UserRole::Reviewer, NodeState::Todo, NodeState::Done));
        assert!(!transition_allowed(
            UserRole::Reviewer,
            NodeState::InProgress,
            NodeState::Submitted
        ));
    }

    #[test]
    fn admin_can_force_any_distinct_state() {
        assert!(transition_allowed(UserRole::Admin, NodeState::Done, NodeState::Todo));
        assert!(!transition_allowed(UserRole::Admin, NodeState::Done, NodeState::Done));
    }

    #[test]
    fn write_picks_up_fresh_and_rejected_nodes() {
        assert_eq!(state_after_write(NodeState::Todo), NodeState::InProgress);
        assert_eq!(state_after_write(NodeState::NeedsChanges), NodeState::InProgress);
        assert_eq!(state_after_write(NodeState::InProgress), NodeState::InProgress);
        assert_eq!(state_after_write(NodeState::Done), NodeState::Done);
    }

    #[test]
    fn completeness_reports_missing_slots_and_fields() {
        let required = vec!["topic".to_string(), "advisor".to_string()];
        let form = serde_json::json!({"topic": "graphs", "advisor": ""});
        let slots = vec![slot("proposal", true, false), slot("extra", false, false)];

        let err = check_completeness(&required, Some(&form), &slots).unwrap_err();
        assert_eq!(err.missing_slots, vec!["proposal".to_string()]);
        assert_eq!(err.missing_fields, vec!["advisor".to_string()]);
    }

    #[test]
    fn completeness_passes_when_everything_is_present() {
        let required = vec!["topic".to_string()];
        let form = serde_json::json!({"topic": "graphs"});
        let slots = vec![slot("proposal", true, true), slot("extra", false, false)];
        assert!(check_completeness(&required, Some(&form), &slots).is_ok());
    }

    #[test]
    fn completeness_with_no_form_data_flags_all_required_fields() {
        let required = vec!["topic".to_string()];
        let err = check_completeness(&required, None, &[]).unwrap_err();
        assert_eq!(err.missing_fields, vec!["topic".to_string()]);
    }
}
