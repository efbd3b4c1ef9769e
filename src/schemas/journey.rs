use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{NodeOutcome, SlotAttachment};
use crate::db::types::{AttachmentStatus, NodeState, SlotMultiplicity};

#[derive(Debug, Deserialize)]
pub(crate) struct StateUpdate {
    #[serde(alias = "nodeId")]
    pub(crate) node_id: String,
    pub(crate) state: NodeState,
    /// Admins may act on another user's journey; everyone else acts on their
    /// own.
    #[serde(default)]
    #[serde(alias = "userId")]
    pub(crate) user_id: Option<String>,
}

/// Every state mutation answers with the fresh unlock set so callers never
/// act on a stale view.
#[derive(Debug, Serialize)]
pub(crate) struct StateWriteResponse {
    pub(crate) states: BTreeMap<String, NodeState>,
    pub(crate) unlocked: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MapResponse {
    pub(crate) program_version: String,
    pub(crate) phases: Vec<MapPhase>,
    pub(crate) nodes: Vec<MapNode>,
    pub(crate) unlocked: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MapPhase {
    pub(crate) key: String,
    pub(crate) title: String,
    pub(crate) order: i32,
    pub(crate) color: Option<String>,
    pub(crate) visible: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct MapNode {
    pub(crate) slug: String,
    pub(crate) title: String,
    pub(crate) module_key: Option<String>,
    pub(crate) phase: String,
    pub(crate) points: i32,
    pub(crate) prerequisites: Vec<String>,
    pub(crate) assessment_id: Option<String>,
    pub(crate) state: NodeState,
    pub(crate) unlocked: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmissionWrite {
    #[serde(default)]
    #[serde(alias = "formData")]
    pub(crate) form_data: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) state: Option<NodeState>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) node_id: String,
    pub(crate) state: NodeState,
    pub(crate) form: FormResponse,
    pub(crate) slots: Vec<SlotResponse>,
    pub(crate) outcomes: Vec<OutcomeResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FormResponse {
    pub(crate) rev: i32,
    pub(crate) data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct SlotResponse {
    pub(crate) key: String,
    pub(crate) required: bool,
    pub(crate) multiplicity: SlotMultiplicity,
    pub(crate) mime_allow: Vec<String>,
    pub(crate) attachments: Vec<AttachmentResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttachmentResponse {
    pub(crate) id: String,
    pub(crate) filename: String,
    pub(crate) size_bytes: i64,
    pub(crate) etag: Option<String>,
    pub(crate) status: AttachmentStatus,
    pub(crate) review_note: Option<String>,
    pub(crate) reviewed_at: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) attached_at: String,
}

impl AttachmentResponse {
    pub(crate) fn from_db(attachment: SlotAttachment) -> Self {
        Self {
            id: attachment.id,
            filename: attachment.filename,
            size_bytes: attachment.size_bytes,
            etag: attachment.etag,
            status: attachment.status,
            review_note: attachment.review_note,
            reviewed_at: attachment.reviewed_at.map(format_primitive),
            is_active: attachment.is_active,
            attached_at: format_primitive(attachment.attached_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OutcomeResponse {
    pub(crate) id: String,
    pub(crate) outcome_value: String,
    pub(crate) decided_by: String,
    pub(crate) note: Option<String>,
    pub(crate) created_at: String,
}

impl OutcomeResponse {
    pub(crate) fn from_db(outcome: NodeOutcome) -> Self {
        Self {
            id: outcome.id,
            outcome_value: outcome.outcome_value,
            decided_by: outcome.decided_by,
            note: outcome.note,
            created_at: format_primitive(outcome.created_at),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct PresignRequest {
    #[serde(alias = "slotKey")]
    #[validate(length(min = 1, message = "slot_key must not be empty"))]
    pub(crate) slot_key: String,
    #[validate(length(min = 1, message = "filename must not be empty"))]
    pub(crate) filename: String,
    #[serde(alias = "contentType")]
    #[validate(length(min = 1, message = "content_type must not be empty"))]
    pub(crate) content_type: String,
    #[serde(alias = "sizeBytes")]
    #[validate(range(min = 1, message = "size_bytes must be positive"))]
    pub(crate) size_bytes: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct PresignResponse {
    pub(crate) upload_url: String,
    pub(crate) object_key: String,
    pub(crate) expires_in_seconds: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AttachRequest {
    #[serde(alias = "slotKey")]
    #[validate(length(min = 1, message = "slot_key must not be empty"))]
    pub(crate) slot_key: String,
    #[serde(alias = "objectKey")]
    #[validate(length(min = 1, message = "object_key must not be empty"))]
    pub(crate) object_key: String,
    #[validate(length(min = 1, message = "filename must not be empty"))]
    pub(crate) filename: String,
    #[serde(alias = "sizeBytes")]
    #[validate(range(min = 0, message = "size_bytes must be non-negative"))]
    pub(crate) size_bytes: i64,
    #[serde(default)]
    pub(crate) etag: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DownloadResponse {
    pub(crate) download_url: String,
    pub(crate) filename: String,
    pub(crate) expires_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewRequest {
    pub(crate) status: AttachmentStatus,
    #[serde(default)]
    pub(crate) note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct OutcomeRequest {
    #[serde(alias = "userId")]
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub(crate) user_id: String,
    #[serde(alias = "outcomeValue")]
    #[validate(length(min = 1, message = "outcome_value must not be empty"))]
    pub(crate) outcome_value: String,
    #[serde(default)]
    pub(crate) note: Option<String>,
}
