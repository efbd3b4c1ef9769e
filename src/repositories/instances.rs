use sqlx::PgPool;

use crate::db::models::{NodeFormRevision, NodeInstance, NodeOutcome, NodeSlot, SlotAttachment};
use crate::db::types::{AttachmentStatus, NodeState, SlotMultiplicity};

const INSTANCE_COLUMNS: &str = "\
    id, user_id, program_version_id, node_slug, state, current_rev, created_at, updated_at";

const ATTACHMENT_COLUMNS: &str = "\
    id, slot_id, object_key, filename, size_bytes, etag, status, review_note, \
    reviewed_by, reviewed_at, is_active, attached_by, attached_at";

pub(crate) async fn find_instance(
    pool: &PgPool,
    user_id: &str,
    node_slug: &str,
) -> Result<Option<NodeInstance>, sqlx::Error> {
    sqlx::query_as::<_, NodeInstance>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM node_instances WHERE user_id = $1 AND node_slug = $2"
    ))
    .bind(user_id)
    .bind(node_slug)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn fetch_instance(
    pool: &PgPool,
    id: &str,
) -> Result<NodeInstance, sqlx::Error> {
    sqlx::query_as::<_, NodeInstance>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM node_instances WHERE id = $1"
    ))
    .bind(id)
    .fetch_one(pool)
    .await
}

pub(crate) struct CreateInstance<'a> {
    pub(crate) id: &'a str,
    pub(crate) user_id: &'a str,
    pub(crate) program_version_id: &'a str,
    pub(crate) node_slug: &'a str,
    pub(crate) created_at: time::PrimitiveDateTime,
}

pub(crate) async fn create_instance(
    executor: impl sqlx::PgExecutor<'_>,
    params: CreateInstance<'_>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO node_instances (
            id, user_id, program_version_id, node_slug, state, current_rev, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,0,$6,$6)
        ON CONFLICT (user_id, node_slug) DO NOTHING",
    )
    .bind(params.id)
    .bind(params.user_id)
    .bind(params.program_version_id)
    .bind(params.node_slug)
    .bind(NodeState::Todo)
    .bind(params.created_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn instance_for_slot(
    pool: &PgPool,
    slot_id: &str,
) -> Result<Option<NodeInstance>, sqlx::Error> {
    sqlx::query_as::<_, NodeInstance>(&format!(
        "SELECT i.{} FROM node_instances i
         JOIN node_slots s ON s.node_instance_id = i.id
         WHERE s.id = $1",
        INSTANCE_COLUMNS.replace(", ", ", i."),
    ))
    .bind(slot_id)
    .fetch_optional(pool)
    .await
}

/// Unconditional state write used when the journey mapping is the authority
/// (admin overrides, reviewer decisions already serialized upstream).
pub(crate) async fn force_state(
    executor: impl sqlx::PgExecutor<'_>,
    user_id: &str,
    node_slug: &str,
    state: NodeState,
    updated_at: time::PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE node_instances SET state = $1, updated_at = $2 \
         WHERE user_id = $3 AND node_slug = $4",
    )
    .bind(state)
    .bind(updated_at)
    .bind(user_id)
    .bind(node_slug)
    .execute(executor)
    .await?;
    Ok(())
}

/// Optimistic state update: the write only lands if the instance is still in
/// the state the caller saw. Zero rows means a concurrent transition won.
pub(crate) async fn update_state_guarded(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    from: NodeState,
    to: NodeState,
    updated_at: time::PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE node_instances SET state = $1, updated_at = $2 WHERE id = $3 AND state = $4",
    )
    .bind(to)
    .bind(updated_at)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn latest_revision(
    pool: &PgPool,
    node_instance_id: &str,
) -> Result<Option<NodeFormRevision>, sqlx::Error> {
    sqlx::query_as::<_, NodeFormRevision>(
        "SELECT id, node_instance_id, rev, form_data, edited_by, created_at
         FROM node_form_revisions WHERE node_instance_id = $1
         ORDER BY rev DESC LIMIT 1",
    )
    .bind(node_instance_id)
    .fetch_optional(pool)
    .await
}

pub(crate) struct CreateRevision<'a> {
    pub(crate) id: &'a str,
    pub(crate) node_instance_id: &'a str,
    pub(crate) rev: i32,
    pub(crate) form_data: serde_json::Value,
    pub(crate) edited_by: &'a str,
    pub(crate) created_at: time::PrimitiveDateTime,
}

pub(crate) async fn append_revision(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    params: CreateRevision<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO node_form_revisions (
            id, node_instance_id, rev, form_data, edited_by, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(params.id)
    .bind(params.node_instance_id)
    .bind(params.rev)
    .bind(sqlx::types::Json(params.form_data))
    .bind(params.edited_by)
    .bind(params.created_at)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE node_instances SET current_rev = $1, updated_at = $2 WHERE id = $3")
        .bind(params.rev)
        .bind(params.created_at)
        .bind(params.node_instance_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub(crate) struct EnsureSlot<'a> {
    pub(crate) id: &'a str,
    pub(crate) node_instance_id: &'a str,
    pub(crate) slot_key: &'a str,
    pub(crate) required: bool,
    pub(crate) multiplicity: SlotMultiplicity,
    pub(crate) mime_allow: &'a [String],
}

pub(crate) async fn ensure_slot(
    executor: impl sqlx::PgExecutor<'_>,
    params: EnsureSlot<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO node_slots (id, node_instance_id, slot_key, required, multiplicity, mime_allow)
         VALUES ($1,$2,$3,$4,$5,$6)
         ON CONFLICT (node_instance_id, slot_key) DO NOTHING",
    )
    .bind(params.id)
    .bind(params.node_instance_id)
    .bind(params.slot_key)
    .bind(params.required)
    .bind(params.multiplicity)
    .bind(params.mime_allow)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn slots_for_instance(
    pool: &PgPool,
    node_instance_id: &str,
) -> Result<Vec<NodeSlot>, sqlx::Error> {
    sqlx::query_as::<_, NodeSlot>(
        "SELECT id, node_instance_id, slot_key, required, multiplicity, mime_allow
         FROM node_slots WHERE node_instance_id = $1 ORDER BY slot_key",
    )
    .bind(node_instance_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_slot(
    pool: &PgPool,
    node_instance_id: &str,
    slot_key: &str,
) -> Result<Option<NodeSlot>, sqlx::Error> {
    sqlx::query_as::<_, NodeSlot>(
        "SELECT id, node_instance_id, slot_key, required, multiplicity, mime_allow
         FROM node_slots WHERE node_instance_id = $1 AND slot_key = $2",
    )
    .bind(node_instance_id)
    .bind(slot_key)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn attachments_for_slots(
    pool: &PgPool,
    slot_ids: &[String],
) -> Result<Vec<SlotAttachment>, sqlx::Error> {
    sqlx::query_as::<_, SlotAttachment>(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM slot_attachments
         WHERE slot_id = ANY($1) ORDER BY attached_at",
    ))
    .bind(slot_ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_attachment(
    pool: &PgPool,
    id: &str,
) -> Result<Option<SlotAttachment>, sqlx::Error> {
    sqlx::query_as::<_, SlotAttachment>(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM slot_attachments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Prior versions are kept; only the `is_active` flag moves.
pub(crate) async fn deactivate_slot_attachments(
    executor: impl sqlx::PgExecutor<'_>,
    slot_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE slot_attachments SET is_active = FALSE WHERE slot_id = $1 AND is_active")
        .bind(slot_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) struct CreateAttachment<'a> {
    pub(crate) id: &'a str,
    pub(crate) slot_id: &'a str,
    pub(crate) object_key: &'a str,
    pub(crate) filename: &'a str,
    pub(crate) size_bytes: i64,
    pub(crate) etag: Option<&'a str>,
    pub(crate) attached_by: &'a str,
    pub(crate) attached_at: time::PrimitiveDateTime,
}

pub(crate) async fn insert_attachment(
    executor: impl sqlx::PgExecutor<'_>,
    params: CreateAttachment<'_>,
) -> Result<SlotAttachment, sqlx::Error> {
    sqlx::query_as::<_, SlotAttachment>(&format!(
        "INSERT INTO slot_attachments (
            id, slot_id, object_key, filename, size_bytes, etag, status, is_active,
            attached_by, attached_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,TRUE,$8,$9)
        RETURNING {ATTACHMENT_COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.slot_id)
    .bind(params.object_key)
    .bind(params.filename)
    .bind(params.size_bytes)
    .bind(params.etag)
    .bind(AttachmentStatus::Submitted)
    .bind(params.attached_by)
    .bind(params.attached_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn review_attachment(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    status: AttachmentStatus,
    review_note: Option<&str>,
    reviewed_by: &str,
    reviewed_at: time::PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE slot_attachments
         SET status = $1, review_note = $2, reviewed_by = $3, reviewed_at = $4
         WHERE id = $5",
    )
    .bind(status)
    .bind(review_note)
    .bind(reviewed_by)
    .bind(reviewed_at)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

/// True when every active attachment across the instance's slots is approved
/// and at least one active attachment exists on every required slot.
pub(crate) async fn all_active_attachments_approved(
    pool: &PgPool,
    node_instance_id: &str,
) -> Result<bool, sqlx::Error> {
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM slot_attachments a
         JOIN node_slots s ON s.id = a.slot_id
         WHERE s.node_instance_id = $1 AND a.is_active AND a.status <> $2",
    )
    .bind(node_instance_id)
    .bind(AttachmentStatus::Approved)
    .fetch_one(pool)
    .await?;

    if pending > 0 {
        return Ok(false);
    }

    let unfilled: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM node_slots s
         WHERE s.node_instance_id = $1 AND s.required AND NOT EXISTS (
             SELECT 1 FROM slot_attachments a WHERE a.slot_id = s.id AND a.is_active
         )",
    )
    .bind(node_instance_id)
    .fetch_one(pool)
    .await?;

    Ok(unfilled == 0)
}

pub(crate) async fn outcomes_for_instance(
    pool: &PgPool,
    node_instance_id: &str,
) -> Result<Vec<NodeOutcome>, sqlx::Error> {
    sqlx::query_as::<_, NodeOutcome>(
        "SELECT id, node_instance_id, outcome_value, decided_by, note, created_at
         FROM node_outcomes WHERE node_instance_id = $1 ORDER BY created_at",
    )
    .bind(node_instance_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateOutcome<'a> {
    pub(crate) id: &'a str,
    pub(crate) node_instance_id: &'a str,
    pub(crate) outcome_value: &'a str,
    pub(crate) decided_by: &'a str,
    pub(crate) note: Option<&'a str>,
    pub(crate) created_at: time::PrimitiveDateTime,
}

pub(crate) async fn append_outcome(
    executor: impl sqlx::PgExecutor<'_>,
    params: CreateOutcome<'_>,
) -> Result<NodeOutcome, sqlx::Error> {
    sqlx::query_as::<_, NodeOutcome>(
        "INSERT INTO node_outcomes (id, node_instance_id, outcome_value, decided_by, note, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)
         RETURNING id, node_instance_id, outcome_value, decided_by, note, created_at",
    )
    .bind(params.id)
    .bind(params.node_instance_id)
    .bind(params.outcome_value)
    .bind(params.decided_by)
    .bind(params.note)
    .bind(params.created_at)
    .fetch_one(executor)
    .await
}

#[cfg(test)]
mod tests {
    use sqlx::Acquire;
    use uuid::Uuid;

    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::db::types::UserRole;
    use crate::repositories::{journey, programs, users};
    use crate::test_support;

    // The instance state and the journey mapping are written inside one
    // transaction; a failure before commit must revert both together.
    // Runs against a live database when one is configured; the outer
    // transaction is dropped at the end, so nothing persists.
    #[tokio::test]
    async fn state_and_journey_writes_commit_or_roll_back_together() {
        let Some(pool) = test_support::test_pool().await else { return };
        let now = primitive_now_utc();
        let mut tx = pool.begin().await.expect("tx");

        let user_id = Uuid::new_v4().to_string();
        users::create(
            &mut *tx,
            users::CreateUser {
                id: &user_id,
                email: &format!("{user_id}@example.com"),
                hashed_password: "x".to_string(),
                full_name: "Test Student",
                role: UserRole::Student,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("user");

        let version = programs::create(
            &mut *tx,
            programs::CreateVersion {
                id: &Uuid::new_v4().to_string(),
                program_id: "phd",
                version: "v1",
                checksum: &Uuid::new_v4().to_string(),
                graph: serde_json::json!({"phases": [], "nodes": []}),
                created_by: &user_id,
                created_at: now,
            },
        )
        .await
        .expect("version");

        let instance_id = Uuid::new_v4().to_string();
        create_instance(
            &mut *tx,
            CreateInstance {
                id: &instance_id,
                user_id: &user_id,
                program_version_id: &version.id,
                node_slug: "thesis",
                created_at: now,
            },
        )
        .await
        .expect("instance");

        // Abandoned savepoint: both writes land, neither survives.
        {
            let mut inner = tx.begin().await.expect("savepoint");
            let moved = update_state_guarded(
                &mut *inner,
                &instance_id,
                NodeState::Todo,
                NodeState::InProgress,
                now,
            )
            .await
            .expect("guarded update");
            assert!(moved);
            journey::upsert_state(&mut *inner, &user_id, "thesis", NodeState::InProgress, now)
                .await
                .expect("journey write");
        }

        let state: NodeState =
            sqlx::query_scalar("SELECT state FROM node_instances WHERE id = $1")
                .bind(&instance_id)
                .fetch_one(&mut *tx)
                .await
                .expect("instance state");
        assert_eq!(state, NodeState::Todo);
        let mapped: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM journey_states WHERE user_id = $1")
                .bind(&user_id)
                .fetch_one(&mut *tx)
                .await
                .expect("journey count");
        assert_eq!(mapped, 0, "a rolled-back transition must not leave a journey entry");

        // Committed savepoint: both writes survive.
        let mut inner = tx.begin().await.expect("savepoint");
        let moved = update_state_guarded(
            &mut *inner,
            &instance_id,
            NodeState::Todo,
            NodeState::InProgress,
            now,
        )
        .await
        .expect("guarded update");
        assert!(moved);
        journey::upsert_state(&mut *inner, &user_id, "thesis", NodeState::InProgress, now)
            .await
            .expect("journey write");
        inner.commit().await.expect("commit");

        let state: NodeState =
            sqlx::query_scalar("SELECT state FROM node_instances WHERE id = $1")
                .bind(&instance_id)
                .fetch_one(&mut *tx)
                .await
                .expect("instance state");
        assert_eq!(state, NodeState::InProgress);
        let mapped: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM journey_states WHERE user_id = $1")
                .bind(&user_id)
                .fetch_one(&mut *tx)
                .await
                .expect("journey count");
        assert_eq!(mapped, 1);
    }
}
