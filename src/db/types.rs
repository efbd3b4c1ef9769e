use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "userrole", rename_all = "lowercase")]
pub(crate) enum UserRole {
    Student,
    Reviewer,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "programstatus", rename_all = "lowercase")]
pub(crate) enum ProgramStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "nodestate", rename_all = "snake_case")]
pub(crate) enum NodeState {
    Todo,
    InProgress,
    Submitted,
    NeedsChanges,
    Done,
}

impl NodeState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            NodeState::Todo => "todo",
            NodeState::InProgress => "in_progress",
            NodeState::Submitted => "submitted",
            NodeState::NeedsChanges => "needs_changes",
            NodeState::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "slotmultiplicity", rename_all = "lowercase")]
pub(crate) enum SlotMultiplicity {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "attachmentstatus", rename_all = "lowercase")]
pub(crate) enum AttachmentStatus {
    Submitted,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "gradingpolicy", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum GradingPolicy {
    Automatic,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "questiontype", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum QuestionType {
    Mcq,
    TrueFalse,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "attemptstatus", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Graded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_state_wire_format_is_snake_case() {
        assert_eq!(serde_json::to_string(&NodeState::NeedsChanges).unwrap(), "\"needs_changes\"");
        assert_eq!(serde_json::to_string(&NodeState::InProgress).unwrap(), "\"in_progress\"");
    }

    #[test]
    fn attempt_status_wire_format_is_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&AttemptStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!(serde_json::to_string(&GradingPolicy::ManualReview).unwrap(), "\"MANUAL_REVIEW\"");
        assert_eq!(serde_json::to_string(&QuestionType::Mcq).unwrap(), "\"MCQ\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!AttemptStatus::InProgress.is_terminal());
        assert!(AttemptStatus::Submitted.is_terminal());
        assert!(AttemptStatus::Graded.is_terminal());
    }
}
