use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::{codes, ApiError};
use crate::api::guards::{CurrentReviewer, CurrentUser};
use crate::api::journey::{active_graph, ensure_transition, invalidate_state_cache};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{NodeInstance, User};
use crate::db::types::{AttachmentStatus, NodeState, UserRole};
use crate::repositories::{self, instances};
use crate::schemas::journey::{
    AttachRequest, AttachmentResponse, DownloadResponse, FormResponse, OutcomeRequest,
    OutcomeResponse, PresignRequest, PresignResponse, ReviewRequest, SlotResponse,
    SubmissionResponse, SubmissionWrite,
};
use crate::services::graph::{self, NodeDef};
use crate::services::submission_rules::{self, SlotStatus};

pub(crate) async fn get_submission(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let (version_id, node) = resolve_node(&state, &slug).await?;
    let instance = ensure_instance(&state, &user, &version_id, &node).await?;
    let response = build_submission(&state, &instance).await?;
    Ok(Json(response))
}

pub(crate) async fn put_submission(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
    Json(payload): Json<SubmissionWrite>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let (version_id, node) = resolve_node(&state, &slug).await?;
    let mut instance = ensure_instance(&state, &user, &version_id, &node).await?;
    let now = primitive_now_utc();

    if let Some(form_data) = payload.form_data {
        if !form_data.is_object() {
            return Err(ApiError::BadRequest("form_data must be a JSON object".to_string()));
        }

        let next_rev = instance.current_rev + 1;
        let mut tx = state
            .db()
            .begin()
            .await
            .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
        instances::append_revision(
            &mut tx,
            instances::CreateRevision {
                id: &Uuid::new_v4().to_string(),
                node_instance_id: &instance.id,
                rev: next_rev,
                form_data,
                edited_by: &user.id,
                created_at: now,
            },
        )
        .await
        .map_err(|e| ApiError::internal(e, "Failed to append form revision"))?;

        // Writing a form counts as starting (or resuming) the node.
        let auto = submission_rules::state_after_write(instance.state);
        if auto != instance.state {
            instances::update_state_guarded(&mut *tx, &instance.id, instance.state, auto, now)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to update node state"))?;
            repositories::journey::upsert_state(&mut *tx, &user.id, &slug, auto, now)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to write journey state"))?;
        }
        tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit submission"))?;

        invalidate_state_cache(&state, &user.id).await;
        instance = instances::fetch_instance(state.db(), &instance.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to reload node instance"))?;
    }

    if let Some(target) = payload.state {
        instance = apply_transition(&state, &user, &node, instance, target).await?;
    }

    let response = build_submission(&state, &instance).await?;
    Ok(Json(response))
}

pub(crate) async fn presign_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
    Json(payload): Json<PresignRequest>,
) -> Result<Json<PresignResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (version_id, node) = resolve_node(&state, &slug).await?;
    let instance = ensure_instance(&state, &user, &version_id, &node).await?;
    let slot = instances::find_slot(state.db(), &instance.id, &payload.slot_key)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load upload slot"))?
        .ok_or_else(|| ApiError::NotFound(format!("Unknown slot '{}'", payload.slot_key)))?;

    if !slot.mime_allow.is_empty() && !slot.mime_allow.contains(&payload.content_type) {
        return Err(ApiError::BadRequest(format!(
            "Content type '{}' is not allowed for this slot",
            payload.content_type
        )));
    }

    let max_bytes = state.settings().journey().max_upload_size_mb * 1024 * 1024;
    if payload.size_bytes as u64 > max_bytes {
        return Err(ApiError::BadRequest(format!(
            "File exceeds the {} MB upload limit",
            state.settings().journey().max_upload_size_mb
        )));
    }

    let storage = state
        .storage()
        .ok_or_else(|| ApiError::ServiceUnavailable("Object storage is not configured".to_string()))?;

    let object_key = format!(
        "journey/{}/{}/{}/{}/{}",
        user.id,
        slug,
        payload.slot_key,
        Uuid::new_v4(),
        payload.filename
    );
    let expires_in_seconds = state.settings().journey().presigned_url_expire_minutes * 60;
    let upload_url = storage
        .presign_put(&object_key, &payload.content_type, Duration::from_secs(expires_in_seconds))
        .await
        .map_err(|e| ApiError::internal(e, "Failed to presign upload"))?;

    Ok(Json(PresignResponse { upload_url, object_key, expires_in_seconds }))
}

pub(crate) async fn attach_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
    Json(payload): Json<AttachRequest>,
) -> Result<(StatusCode, Json<AttachmentResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (version_id, node) = resolve_node(&state, &slug).await?;
    let instance = ensure_instance(&state, &user, &version_id, &node).await?;
    let slot = instances::find_slot(state.db(), &instance.id, &payload.slot_key)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load upload slot"))?
        .ok_or_else(|| ApiError::NotFound(format!("Unknown slot '{}'", payload.slot_key)))?;

    let now = primitive_now_utc();
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;

    // Single slots keep their history but only the newest version is active.
    if slot.multiplicity == crate::db::types::SlotMultiplicity::Single {
        instances::deactivate_slot_attachments(&mut *tx, &slot.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to supersede prior attachments"))?;
    }

    let attachment = instances::insert_attachment(
        &mut *tx,
        instances::CreateAttachment {
            id: &Uuid::new_v4().to_string(),
            slot_id: &slot.id,
            object_key: &payload.object_key,
            filename: &payload.filename,
            size_bytes: payload.size_bytes,
            etag: payload.etag.as_deref(),
            attached_by: &user.id,
            attached_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record attachment"))?;

    let auto = submission_rules::state_after_write(instance.state);
    if auto != instance.state {
        instances::update_state_guarded(&mut *tx, &instance.id, instance.state, auto, now)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to update node state"))?;
        repositories::journey::upsert_state(&mut *tx, &user.id, &slug, auto, now)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to write journey state"))?;
    }

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit attachment"))?;
    invalidate_state_cache(&state, &user.id).await;

    Ok((StatusCode::CREATED, Json(AttachmentResponse::from_db(attachment))))
}

/// Presigned, short-lived download URL for an attachment. Students download
/// their own files; reviewers and admins may fetch any.
pub(crate) async fn download_attachment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((slug, attachment_id)): Path<(String, String)>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let attachment = instances::find_attachment(state.db(), &attachment_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load attachment"))?
        .ok_or_else(|| ApiError::NotFound("Attachment not found".to_string()))?;
    let instance = instances::instance_for_slot(state.db(), &attachment.slot_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load node instance"))?
        .ok_or_else(|| ApiError::NotFound("Attachment not found".to_string()))?;
    if instance.node_slug != slug {
        return Err(ApiError::NotFound("Attachment not found".to_string()));
    }
    if user.role == UserRole::Student && instance.user_id != user.id {
        return Err(ApiError::Forbidden("Not your attachment"));
    }

    let storage = state
        .storage()
        .ok_or_else(|| ApiError::ServiceUnavailable("Object storage is not configured".to_string()))?;
    let expires_in_seconds = state.settings().journey().presigned_url_expire_minutes * 60;
    let download_url = storage
        .presign_get(&attachment.object_key, Duration::from_secs(expires_in_seconds))
        .await
        .map_err(|e| ApiError::internal(e, "Failed to presign download"))?;

    Ok(Json(DownloadResponse {
        download_url,
        filename: attachment.filename,
        expires_in_seconds,
    }))
}

pub(crate) async fn review_attachment(
    State(state): State<AppState>,
    CurrentReviewer(reviewer): CurrentReviewer,
    Path((slug, attachment_id)): Path<(String, String)>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<AttachmentResponse>, ApiError> {
    if payload.status == AttachmentStatus::Submitted {
        return Err(ApiError::BadRequest(
            "Review status must be 'approved' or 'rejected'".to_string(),
        ));
    }

    let attachment = instances::find_attachment(state.db(), &attachment_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load attachment"))?
        .ok_or_else(|| ApiError::NotFound("Attachment not found".to_string()))?;
    let instance = instances::instance_for_slot(state.db(), &attachment.slot_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load node instance"))?
        .ok_or_else(|| ApiError::NotFound("Attachment not found".to_string()))?;
    if instance.node_slug != slug {
        return Err(ApiError::NotFound("Attachment not found".to_string()));
    }

    let now = primitive_now_utc();
    instances::review_attachment(
        state.db(),
        &attachment.id,
        payload.status,
        payload.note.as_deref(),
        &reviewer.id,
        now,
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record review"))?;

    // A rejection sends a submitted node back for changes; once every active
    // attachment on a submitted node is approved it moves to done.
    let target = match payload.status {
        AttachmentStatus::Rejected => Some(NodeState::NeedsChanges),
        AttachmentStatus::Approved => {
            let all_approved =
                instances::all_active_attachments_approved(state.db(), &instance.id)
                    .await
                    .map_err(|e| ApiError::internal(e, "Failed to check attachment statuses"))?;
            all_approved.then_some(NodeState::Done)
        }
        AttachmentStatus::Submitted => None,
    };

    if let Some(to) = target {
        if instance.state == NodeState::Submitted {
            let mut tx = state
                .db()
                .begin()
                .await
                .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
            let moved = instances::update_state_guarded(
                &mut *tx,
                &instance.id,
                NodeState::Submitted,
                to,
                now,
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to update node state"))?;
            if moved {
                repositories::journey::upsert_state(
                    &mut *tx,
                    &instance.user_id,
                    &instance.node_slug,
                    to,
                    now,
                )
                .await
                .map_err(|e| ApiError::internal(e, "Failed to write journey state"))?;
            }
            tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit node state"))?;
            if moved {
                invalidate_state_cache(&state, &instance.user_id).await;
            }
        }
    }

    let updated = instances::find_attachment(state.db(), &attachment.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reload attachment"))?
        .ok_or_else(|| ApiError::NotFound("Attachment not found".to_string()))?;

    Ok(Json(AttachmentResponse::from_db(updated)))
}

pub(crate) async fn post_outcome(
    State(state): State<AppState>,
    CurrentReviewer(reviewer): CurrentReviewer,
    Path(slug): Path<String>,
    Json(payload): Json<OutcomeRequest>,
) -> Result<(StatusCode, Json<OutcomeResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let instance = instances::find_instance(state.db(), &payload.user_id, &slug)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load node instance"))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No submission for node '{slug}' by that user"))
        })?;

    let outcome = instances::append_outcome(
        state.db(),
        instances::CreateOutcome {
            id: &Uuid::new_v4().to_string(),
            node_instance_id: &instance.id,
            outcome_value: &payload.outcome_value,
            decided_by: &reviewer.id,
            note: payload.note.as_deref(),
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record outcome"))?;

    Ok((StatusCode::CREATED, Json(OutcomeResponse::from_db(outcome))))
}

async fn resolve_node(state: &AppState, slug: &str) -> Result<(String, NodeDef), ApiError> {
    let (version, graph) = active_graph(state).await?;
    let node = graph
        .node(slug)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Unknown node '{slug}'")))?;
    Ok((version.id, node))
}

/// Instances are created lazily on first interaction, together with the
/// upload slots their node declares.
async fn ensure_instance(
    state: &AppState,
    user: &User,
    version_id: &str,
    node: &NodeDef,
) -> Result<NodeInstance, ApiError> {
    let existing = instances::find_instance(state.db(), &user.id, &node.slug)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load node instance"))?;

    let instance = match existing {
        Some(instance) => instance,
        None => {
            instances::create_instance(
                state.db(),
                instances::CreateInstance {
                    id: &Uuid::new_v4().to_string(),
                    user_id: &user.id,
                    program_version_id: version_id,
                    node_slug: &node.slug,
                    created_at: primitive_now_utc(),
                },
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to create node instance"))?;
            // Re-fetch: a concurrent first interaction may have won the insert.
            instances::find_instance(state.db(), &user.id, &node.slug)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to load node instance"))?
                .ok_or_else(|| ApiError::Internal("Node instance vanished".to_string()))?
        }
    };

    if let Some(requirements) = &node.requirements {
        for slot_def in &requirements.uploads {
            instances::ensure_slot(
                state.db(),
                instances::EnsureSlot {
                    id: &Uuid::new_v4().to_string(),
                    node_instance_id: &instance.id,
                    slot_key: &slot_def.key,
                    required: slot_def.required,
                    multiplicity: slot_def.multiplicity,
                    mime_allow: &slot_def.mime,
                },
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to create upload slot"))?;
        }
    }

    Ok(instance)
}

async fn apply_transition(
    state: &AppState,
    user: &User,
    node: &NodeDef,
    instance: NodeInstance,
    target: NodeState,
) -> Result<NodeInstance, ApiError> {
    if target == instance.state {
        return Ok(instance);
    }
    ensure_transition(user.role, instance.state, target)?;

    // The submit gate: students cannot hand in half-filled nodes.
    if target == NodeState::Submitted && user.role == UserRole::Student {
        let (form_data, slot_statuses) = completeness_inputs(state, &instance).await?;
        let required_fields = graph::required_form_fields(node);
        if let Err(incomplete) =
            submission_rules::check_completeness(&required_fields, form_data.as_ref(), &slot_statuses)
        {
            let extra =
                serde_json::to_value(&incomplete).unwrap_or_else(|_| serde_json::json!({}));
            return Err(ApiError::coded_with(
                StatusCode::BAD_REQUEST,
                codes::INCOMPLETE_SUBMISSION,
                "Submission is missing required fields or uploads",
                extra,
            ));
        }
    }

    // Instance state and the journey mapping move in one transaction so no
    // reader ever sees them disagree.
    let now = primitive_now_utc();
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    let moved =
        instances::update_state_guarded(&mut *tx, &instance.id, instance.state, target, now)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to update node state"))?;
    if !moved {
        return Err(ApiError::Conflict("Node state changed concurrently, retry".to_string()));
    }

    repositories::journey::upsert_state(&mut *tx, &user.id, &instance.node_slug, target, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to write journey state"))?;
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit node state"))?;
    invalidate_state_cache(state, &user.id).await;

    instances::fetch_instance(state.db(), &instance.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reload node instance"))
}

async fn completeness_inputs(
    state: &AppState,
    instance: &NodeInstance,
) -> Result<(Option<serde_json::Value>, Vec<SlotStatus>), ApiError> {
    let form_data = instances::latest_revision(state.db(), &instance.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load form revision"))?
        .map(|revision| revision.form_data.0);

    let slots = instances::slots_for_instance(state.db(), &instance.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load upload slots"))?;
    let slot_ids: Vec<String> = slots.iter().map(|slot| slot.id.clone()).collect();
    let attachments = instances::attachments_for_slots(state.db(), &slot_ids)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load attachments"))?;

    let statuses = slots
        .iter()
        .map(|slot| SlotStatus {
            key: slot.slot_key.clone(),
            required: slot.required,
            has_active_attachment: attachments
                .iter()
                .any(|attachment| attachment.slot_id == slot.id && attachment.is_active),
        })
        .collect();

    Ok((form_data, statuses))
}

async fn build_submission(
    state: &AppState,
    instance: &NodeInstance,
) -> Result<SubmissionResponse, ApiError> {
    let revision = instances::latest_revision(state.db(), &instance.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load form revision"))?;
    let form = match revision {
        Some(revision) => FormResponse { rev: revision.rev, data: revision.form_data.0 },
        None => FormResponse { rev: 0, data: serde_json::json!({}) },
    };

    let slots = instances::slots_for_instance(state.db(), &instance.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load upload slots"))?;
    let slot_ids: Vec<String> = slots.iter().map(|slot| slot.id.clone()).collect();
    let mut attachments = instances::attachments_for_slots(state.db(), &slot_ids)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load attachments"))?;

    let slot_responses = slots
        .into_iter()
        .map(|slot| {
            let mut own: Vec<AttachmentResponse> = Vec::new();
            attachments.retain(|attachment| {
                if attachment.slot_id == slot.id {
                    own.push(AttachmentResponse::from_db(attachment.clone()));
                    false
                } else {
                    true
                }
            });
            SlotResponse {
                key: slot.slot_key,
                required: slot.required,
                multiplicity: slot.multiplicity,
                mime_allow: slot.mime_allow,
                attachments: own,
            }
        })
        .collect();

    let outcomes = instances::outcomes_for_instance(state.db(), &instance.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load outcomes"))?
        .into_iter()
        .map(OutcomeResponse::from_db)
        .collect();

    Ok(SubmissionResponse {
        node_id: instance.node_slug.clone(),
        state: instance.state,
        form,
        slots: slot_responses,
        outcomes,
    })
}
