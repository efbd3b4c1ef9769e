use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::{codes, ApiError};
use crate::api::guards::CurrentAdmin;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories::programs;
use crate::schemas::program::{VersionCreate, VersionResponse};
use crate::services::graph::{self, Graph};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:program_id/versions", post(create_version))
        .route("/versions/:id", get(get_version))
        .route("/versions/:id/publish", post(publish_version))
}

/// Draft upload. The payload must parse into a graph definition; structural
/// validation (cycles, dangling prerequisites) is deferred to publish so
/// authors can save work in progress. Identical graphs dedupe on checksum.
async fn create_version(
    State(state): State<AppState>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(program_id): Path<String>,
    Json(payload): Json<VersionCreate>,
) -> Result<(StatusCode, Json<VersionResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    graph::parse_definition(&payload.graph)
        .map_err(|e| ApiError::BadRequest(format!("Graph definition does not parse: {e}")))?;

    let checksum = graph_checksum(&payload.graph)?;
    if let Some(existing) = programs::find_by_checksum(state.db(), &program_id, &checksum)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check for duplicate version"))?
    {
        return Ok((StatusCode::OK, Json(VersionResponse::from_db(existing))));
    }

    let version = programs::create(
        state.db(),
        programs::CreateVersion {
            id: &Uuid::new_v4().to_string(),
            program_id: &program_id,
            version: &payload.version,
            checksum: &checksum,
            graph: payload.graph,
            created_by: &admin.id,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create program version"))?;

    Ok((StatusCode::CREATED, Json(VersionResponse::from_db(version))))
}

async fn get_version(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Path(id): Path<String>,
) -> Result<Json<VersionResponse>, ApiError> {
    let version = programs::find_by_id(state.db(), &id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load program version"))?
        .ok_or_else(|| ApiError::NotFound("Program version not found".to_string()))?;
    Ok(Json(VersionResponse::from_db(version)))
}

/// Graph integrity errors are fatal here: an invalid graph never reaches the
/// published state that journeys are served from.
async fn publish_version(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Path(id): Path<String>,
) -> Result<Json<VersionResponse>, ApiError> {
    let version = programs::find_by_id(state.db(), &id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load program version"))?
        .ok_or_else(|| ApiError::NotFound("Program version not found".to_string()))?;

    let definition = graph::parse_definition(&version.graph.0).map_err(|e| {
        ApiError::coded(
            StatusCode::UNPROCESSABLE_ENTITY,
            codes::GRAPH_INVALID,
            format!("Graph definition does not parse: {e}"),
        )
    })?;
    Graph::build(definition).map_err(|e| {
        ApiError::coded(StatusCode::UNPROCESSABLE_ENTITY, codes::GRAPH_INVALID, e.to_string())
    })?;

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    programs::publish(&mut tx, &version.id, &version.program_id, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to publish program version"))?;
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit publish"))?;

    tracing::info!(version_id = %version.id, program_id = %version.program_id, "program version published");

    let published = programs::find_by_id(state.db(), &version.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reload program version"))?
        .ok_or_else(|| ApiError::NotFound("Program version not found".to_string()))?;

    Ok(Json(VersionResponse::from_db(published)))
}

/// sha256 over the canonical JSON encoding (serde_json orders object keys).
fn graph_checksum(graph: &serde_json::Value) -> Result<String, ApiError> {
    let canonical = serde_json::to_vec(graph)
        .map_err(|e| ApiError::internal(e, "Failed to serialize graph"))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
