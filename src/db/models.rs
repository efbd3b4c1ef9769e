use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{
    AttachmentStatus, AttemptStatus, GradingPolicy, NodeState, ProgramStatus, QuestionType,
    SlotMultiplicity, UserRole,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) email: String,
    pub(crate) hashed_password: String,
    pub(crate) full_name: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ProgramVersion {
    pub(crate) id: String,
    pub(crate) program_id: String,
    pub(crate) version: String,
    pub(crate) status: ProgramStatus,
    pub(crate) checksum: String,
    pub(crate) graph: Json<serde_json::Value>,
    pub(crate) created_by: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) published_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct NodeInstance {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) program_version_id: String,
    pub(crate) node_slug: String,
    pub(crate) state: NodeState,
    pub(crate) current_rev: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct NodeFormRevision {
    pub(crate) id: String,
    pub(crate) node_instance_id: String,
    pub(crate) rev: i32,
    pub(crate) form_data: Json<serde_json::Value>,
    pub(crate) edited_by: String,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct NodeSlot {
    pub(crate) id: String,
    pub(crate) node_instance_id: String,
    pub(crate) slot_key: String,
    pub(crate) required: bool,
    pub(crate) multiplicity: SlotMultiplicity,
    pub(crate) mime_allow: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct SlotAttachment {
    pub(crate) id: String,
    pub(crate) slot_id: String,
    pub(crate) object_key: String,
    pub(crate) filename: String,
    pub(crate) size_bytes: i64,
    pub(crate) etag: Option<String>,
    pub(crate) status: AttachmentStatus,
    pub(crate) review_note: Option<String>,
    pub(crate) reviewed_by: Option<String>,
    pub(crate) reviewed_at: Option<PrimitiveDateTime>,
    pub(crate) is_active: bool,
    pub(crate) attached_by: String,
    pub(crate) attached_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct NodeOutcome {
    pub(crate) id: String,
    pub(crate) node_instance_id: String,
    pub(crate) outcome_value: String,
    pub(crate) decided_by: String,
    pub(crate) note: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Assessment {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) time_limit_minutes: i32,
    pub(crate) passing_score: f64,
    pub(crate) grading_policy: GradingPolicy,
    pub(crate) shuffle_questions: bool,
    pub(crate) available_from: Option<PrimitiveDateTime>,
    pub(crate) available_until: Option<PrimitiveDateTime>,
    pub(crate) max_attempts: i32,
    pub(crate) cooldown_minutes: i32,
    pub(crate) created_by: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) stem: String,
    pub(crate) points: f64,
    pub(crate) sort_order: i32,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionOption {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) label: String,
    pub(crate) is_correct: bool,
    pub(crate) sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) score: f64,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) finished_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ItemResponse {
    pub(crate) id: String,
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_option_id: Option<String>,
    pub(crate) text_response: Option<String>,
    pub(crate) score: f64,
    pub(crate) is_correct: bool,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}
