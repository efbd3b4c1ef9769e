use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{ProgramVersion, User};
use crate::db::types::{NodeState, UserRole};
use crate::repositories;
use crate::schemas::journey::{MapNode, MapPhase, MapResponse, StateUpdate, StateWriteResponse};
use crate::services::graph::{self, Graph};
use crate::services::{conditions, progression, submission_rules};

pub(crate) mod submissions;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/state", get(get_state).put(put_state))
        .route("/reset", post(reset))
        .route("/map", get(get_map))
        .route(
            "/nodes/:slug/submission",
            get(submissions::get_submission).put(submissions::put_submission),
        )
        .route("/nodes/:slug/uploads/presign", post(submissions::presign_upload))
        .route("/nodes/:slug/uploads/attach", post(submissions::attach_upload))
        .route(
            "/nodes/:slug/attachments/:attachment_id/review",
            post(submissions::review_attachment),
        )
        .route(
            "/nodes/:slug/attachments/:attachment_id/download",
            get(submissions::download_attachment),
        )
        .route("/nodes/:slug/outcomes", post(submissions::post_outcome))
}

/// Published graph currently serving journeys.
pub(crate) async fn active_graph(state: &AppState) -> Result<(ProgramVersion, Graph), ApiError> {
    let version = repositories::programs::find_active(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load active program version"))?
        .ok_or_else(|| ApiError::NotFound("No published program version".to_string()))?;

    let definition = graph::parse_definition(&version.graph.0)
        .map_err(|e| ApiError::internal(e, "Stored program graph failed to parse"))?;
    let graph = Graph::build(definition)
        .map_err(|e| ApiError::internal(e, "Stored program graph failed validation"))?;

    Ok((version, graph))
}

fn cache_key(user_id: &str) -> String {
    format!("journey:{user_id}")
}

pub(crate) async fn invalidate_state_cache(state: &AppState, user_id: &str) {
    state.redis().delete(&cache_key(user_id)).await;
}

/// Raw `node_slug -> state` mapping through the Redis read-through cache.
async fn load_state_map(
    state: &AppState,
    user_id: &str,
) -> Result<HashMap<String, NodeState>, ApiError> {
    let key = cache_key(user_id);
    if let Some(cached) = state.redis().get_json(&key).await {
        if let Ok(states) = serde_json::from_value::<HashMap<String, NodeState>>(cached) {
            return Ok(states);
        }
        // Unreadable cache entries get dropped and rebuilt from Postgres.
        state.redis().delete(&key).await;
    }

    let states = repositories::journey::state_map(state.db(), user_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load journey state"))?;

    if let Ok(value) = serde_json::to_value(&states) {
        state
            .redis()
            .set_json(&key, &value, state.settings().journey().state_cache_ttl_seconds)
            .await;
    }

    Ok(states)
}

async fn get_state(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<BTreeMap<String, NodeState>>, ApiError> {
    let states = load_state_map(&state, &user.id).await?;
    Ok(Json(states.into_iter().collect()))
}

/// Admin override for a single node state. Re-runs the unlock computation so
/// the acknowledgement never carries a stale view.
async fn put_state(
    State(state): State<AppState>,
    CurrentAdmin(admin): CurrentAdmin,
    Json(payload): Json<StateUpdate>,
) -> Result<Json<StateWriteResponse>, ApiError> {
    let (_, graph) = active_graph(&state).await?;
    if !graph.contains(&payload.node_id) {
        return Err(ApiError::NotFound(format!("Unknown node '{}'", payload.node_id)));
    }

    let target_user = payload.user_id.as_deref().unwrap_or(&admin.id);
    let now = primitive_now_utc();

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    repositories::journey::upsert_state(&mut *tx, target_user, &payload.node_id, payload.state, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to write journey state"))?;
    repositories::instances::force_state(&mut *tx, target_user, &payload.node_id, payload.state, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to sync node instance state"))?;
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit journey state"))?;

    invalidate_state_cache(&state, target_user).await;

    let states = repositories::journey::state_map(state.db(), target_user)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reload journey state"))?;
    let unlocked = progression::compute_unlocked(&graph, &states);

    Ok(Json(StateWriteResponse {
        states: states.into_iter().collect(),
        unlocked: unlocked.into_iter().collect(),
    }))
}

async fn reset(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, ApiError> {
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    repositories::journey::reset(&mut tx, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reset journey"))?;
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit journey reset"))?;

    invalidate_state_cache(&state, &user.id).await;
    tracing::info!(user_id = %user.id, "journey reset");

    Ok(StatusCode::NO_CONTENT)
}

async fn get_map(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MapResponse>, ApiError> {
    let (version, graph) = active_graph(&state).await?;
    let states = load_state_map(&state, &user.id).await?;
    let unlocked = progression::compute_unlocked(&graph, &states);

    let submission_data = condition_inputs(&state, &user, &graph).await?;
    let phases = graph
        .phases()
        .iter()
        .map(|phase| MapPhase {
            key: phase.key.clone(),
            title: phase.title.clone(),
            order: phase.order,
            color: phase.color.clone(),
            visible: phase
                .condition
                .as_ref()
                .map(|condition| conditions::evaluate(condition, &submission_data))
                .unwrap_or(true),
        })
        .collect();

    let nodes = graph
        .nodes()
        .iter()
        .map(|node| MapNode {
            slug: node.slug.clone(),
            title: node.title.clone(),
            module_key: node.module_key.clone(),
            phase: graph.phase_key_for(node).to_string(),
            points: node.points,
            prerequisites: node.prerequisites.clone(),
            assessment_id: graph::assessment_id(node).map(str::to_string),
            state: states.get(&node.slug).copied().unwrap_or(NodeState::Todo),
            unlocked: unlocked.contains(&node.slug),
        })
        .collect();

    Ok(Json(MapResponse {
        program_version: version.version,
        phases,
        nodes,
        unlocked: unlocked.into_iter().collect(),
    }))
}

/// Latest form data for every node a phase condition references, keyed by
/// node slug. Nodes without an instance or revision simply stay absent, which
/// the evaluator treats as unsatisfied.
async fn condition_inputs(
    state: &AppState,
    user: &User,
    graph: &Graph,
) -> Result<HashMap<String, serde_json::Value>, ApiError> {
    let mut inputs = HashMap::new();
    for phase in graph.phases() {
        let Some(condition) = &phase.condition else { continue };
        if inputs.contains_key(&condition.node_slug) {
            continue;
        }
        let Some(instance) =
            repositories::instances::find_instance(state.db(), &user.id, &condition.node_slug)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to load node instance"))?
        else {
            continue;
        };
        if let Some(revision) = repositories::instances::latest_revision(state.db(), &instance.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load form revision"))?
        {
            inputs.insert(condition.node_slug.clone(), revision.form_data.0);
        }
    }
    Ok(inputs)
}

/// Whether `role` may move a node from `from` to `to`; surfaced here so both
/// the submission PUT and reviewer decisions share one gate.
pub(crate) fn ensure_transition(
    role: UserRole,
    from: NodeState,
    to: NodeState,
) -> Result<(), ApiError> {
    if submission_rules::transition_allowed(role, from, to) {
        Ok(())
    } else {
        Err(ApiError::Conflict(format!(
            "Transition {} -> {} is not allowed",
            from.as_str(),
            to.as_str()
        )))
    }
}
