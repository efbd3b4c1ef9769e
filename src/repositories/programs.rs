use sqlx::PgPool;

use crate::db::models::ProgramVersion;
use crate::db::types::ProgramStatus;

const COLUMNS: &str = "\
    id, program_id, version, status, checksum, graph, created_by, created_at, published_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ProgramVersion>, sqlx::Error> {
    sqlx::query_as::<_, ProgramVersion>(&format!(
        "SELECT {COLUMNS} FROM program_versions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_checksum(
    pool: &PgPool,
    program_id: &str,
    checksum: &str,
) -> Result<Option<ProgramVersion>, sqlx::Error> {
    sqlx::query_as::<_, ProgramVersion>(&format!(
        "SELECT {COLUMNS} FROM program_versions WHERE program_id = $1 AND checksum = $2"
    ))
    .bind(program_id)
    .bind(checksum)
    .fetch_optional(pool)
    .await
}

/// The version currently serving journeys: the most recently published one.
pub(crate) async fn find_active(pool: &PgPool) -> Result<Option<ProgramVersion>, sqlx::Error> {
    sqlx::query_as::<_, ProgramVersion>(&format!(
        "SELECT {COLUMNS} FROM program_versions WHERE status = $1 \
         ORDER BY published_at DESC LIMIT 1"
    ))
    .bind(ProgramStatus::Published)
    .fetch_optional(pool)
    .await
}

pub(crate) struct CreateVersion<'a> {
    pub(crate) id: &'a str,
    pub(crate) program_id: &'a str,
    pub(crate) version: &'a str,
    pub(crate) checksum: &'a str,
    pub(crate) graph: serde_json::Value,
    pub(crate) created_by: &'a str,
    pub(crate) created_at: time::PrimitiveDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    params: CreateVersion<'_>,
) -> Result<ProgramVersion, sqlx::Error> {
    sqlx::query_as::<_, ProgramVersion>(&format!(
        "INSERT INTO program_versions (
            id, program_id, version, status, checksum, graph, created_by, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.program_id)
    .bind(params.version)
    .bind(ProgramStatus::Draft)
    .bind(params.checksum)
    .bind(sqlx::types::Json(params.graph))
    .bind(params.created_by)
    .bind(params.created_at)
    .fetch_one(executor)
    .await
}

/// Publish pipeline: archive the previously published version of the same
/// program, then mark this one published. Runs inside the caller's
/// transaction so readers never see zero or two published versions.
pub(crate) async fn publish(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    program_id: &str,
    published_at: time::PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE program_versions SET status = $1 \
         WHERE program_id = $2 AND status = $3 AND id <> $4",
    )
    .bind(ProgramStatus::Archived)
    .bind(program_id)
    .bind(ProgramStatus::Published)
    .bind(id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE program_versions SET status = $1, published_at = $2 WHERE id = $3")
        .bind(ProgramStatus::Published)
        .bind(published_at)
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
