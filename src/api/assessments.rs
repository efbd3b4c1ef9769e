use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::{codes, ApiError};
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc, to_primitive_utc};
use crate::db::models::Assessment;
use crate::db::types::QuestionType;
use crate::repositories::{assessments, attempts};
use crate::schemas::assessment::{AssessmentCreate, AssessmentResponse, AttemptResponse};
use crate::services::{attempt_clock, grading};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(detail))
        .route("/:id/attempts", post(start_attempt))
}

async fn create(
    State(state): State<AppState>,
    CurrentAdmin(admin): CurrentAdmin,
    Json(payload): Json<AssessmentCreate>,
) -> Result<(StatusCode, Json<AssessmentResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    for question in &payload.questions {
        let is_choice =
            matches!(question.question_type, QuestionType::Mcq | QuestionType::TrueFalse);
        if is_choice && !question.options.iter().any(|option| option.is_correct) {
            return Err(ApiError::BadRequest(format!(
                "Question '{}' needs at least one correct option",
                question.stem
            )));
        }
        if question.question_type == QuestionType::TrueFalse && question.options.len() != 2 {
            return Err(ApiError::BadRequest(format!(
                "True/false question '{}' needs exactly two options",
                question.stem
            )));
        }
    }

    let now = primitive_now_utc();
    let assessment_id = Uuid::new_v4().to_string();

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;

    let assessment = assessments::create(
        &mut tx,
        assessments::CreateAssessment {
            id: &assessment_id,
            title: &payload.title,
            description: payload.description.as_deref(),
            time_limit_minutes: payload.time_limit_minutes,
            passing_score: payload.passing_score,
            grading_policy: payload.grading_policy,
            shuffle_questions: payload.shuffle_questions,
            available_from: payload.available_from.map(to_primitive_utc),
            available_until: payload.available_until.map(to_primitive_utc),
            max_attempts: payload.max_attempts,
            cooldown_minutes: payload.cooldown_minutes,
            created_by: &admin.id,
            created_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create assessment"))?;

    for (position, question) in payload.questions.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        assessments::insert_question(
            &mut tx,
            assessments::CreateQuestion {
                id: &question_id,
                assessment_id: &assessment_id,
                question_type: question.question_type,
                stem: &question.stem,
                points: question.points,
                sort_order: if question.sort_order != 0 {
                    question.sort_order
                } else {
                    position as i32
                },
                created_at: now,
            },
        )
        .await
        .map_err(|e| ApiError::internal(e, "Failed to create question"))?;

        for (option_position, option) in question.options.iter().enumerate() {
            assessments::insert_option(
                &mut tx,
                &Uuid::new_v4().to_string(),
                &question_id,
                &option.label,
                option.is_correct,
                if option.sort_order != 0 { option.sort_order } else { option_position as i32 },
            )
            .await
            .map_err(|e| ApiError::internal(e, "Failed to create question option"))?;
        }
    }

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit assessment"))?;

    Ok((StatusCode::CREATED, Json(AssessmentResponse::from_db(assessment))))
}

async fn list(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<Vec<AssessmentResponse>>, ApiError> {
    let all = assessments::list(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list assessments"))?;
    Ok(Json(all.into_iter().map(AssessmentResponse::from_db).collect()))
}

async fn detail(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<AssessmentResponse>, ApiError> {
    let assessment = fetch_assessment(&state, &id).await?;
    Ok(Json(AssessmentResponse::from_db(assessment)))
}

/// Start-attempt gate. Policy outcomes are coded bodies the client branches
/// on, not failures: an existing open attempt is returned for redirect,
/// cooldown carries a retry hint, the cap carries the counts.
async fn start_attempt(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    let assessment = fetch_assessment(&state, &id).await?;
    let now = primitive_now_utc();

    if let Some(from) = assessment.available_from {
        if now < from {
            return Err(ApiError::Forbidden("Assessment is not open yet"));
        }
    }
    if let Some(until) = assessment.available_until {
        if now >= until {
            return Err(ApiError::Forbidden("Assessment is closed"));
        }
    }

    // An expired leftover attempt is finalized first so it does not block the
    // restart and is counted against the cap like any finished attempt.
    if let Some(open) = attempts::find_in_progress(state.db(), &assessment.id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check open attempts"))?
    {
        if attempt_clock::is_expired(open.started_at, assessment.time_limit_minutes, now) {
            grading::finalize_attempt(state.db(), &open)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to finalize expired attempt"))?;
        }
    }

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    attempts::acquire_start_lock(&mut tx, &assessment.id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to serialize attempt start"))?;

    if let Some(open) = attempts::find_in_progress(&mut *tx, &assessment.id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check open attempts"))?
    {
        return Err(attempt_in_progress(open, &assessment));
    }

    if assessment.max_attempts > 0 {
        let used = attempts::count_finished(&mut *tx, &assessment.id, &user.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to count attempts"))?;
        if used >= assessment.max_attempts as i64 {
            return Err(ApiError::coded_with(
                StatusCode::CONFLICT,
                codes::MAX_ATTEMPTS_REACHED,
                "No attempts left for this assessment",
                serde_json::json!({
                    "attempts_used": used,
                    "max_attempts": assessment.max_attempts,
                }),
            ));
        }
    }

    if assessment.cooldown_minutes > 0 {
        let last = attempts::last_finished_at(&mut *tx, &assessment.id, &user.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to read last attempt"))?;
        if let Some(last) = last {
            if let Some(retry_after) =
                attempt_clock::cooldown_retry_after(last, assessment.cooldown_minutes, now)
            {
                return Err(ApiError::coded_with(
                    StatusCode::TOO_MANY_REQUESTS,
                    codes::COOLDOWN_ACTIVE,
                    "Cooldown between attempts is still active",
                    serde_json::json!({ "retry_after_seconds": retry_after }),
                ));
            }
        }
    }

    let attempt_id = Uuid::new_v4().to_string();
    let inserted = attempts::create(
        &mut tx,
        attempts::CreateAttempt {
            id: &attempt_id,
            assessment_id: &assessment.id,
            student_id: &user.id,
            started_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create attempt"))?;

    if !inserted {
        // Lost the unique-index race despite the lock; surface the winner.
        let open = attempts::find_in_progress(&mut *tx, &assessment.id, &user.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load open attempt"))?;
        if let Some(open) = open {
            return Err(attempt_in_progress(open, &assessment));
        }
        return Err(ApiError::Conflict("Attempt could not be started, retry".to_string()));
    }

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit attempt"))?;

    let attempt = attempts::find_by_id(state.db(), &attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reload attempt"))?
        .ok_or_else(|| ApiError::Internal("Attempt vanished after insert".to_string()))?;

    tracing::info!(attempt_id = %attempt.id, assessment_id = %assessment.id, student_id = %user.id, "attempt started");

    Ok((StatusCode::CREATED, Json(AttemptResponse::from_db(attempt, &assessment))))
}

fn attempt_in_progress(open: crate::db::models::Attempt, assessment: &Assessment) -> ApiError {
    let body = serde_json::to_value(AttemptResponse::from_db(open, assessment))
        .unwrap_or_else(|_| serde_json::json!({}));
    ApiError::coded_with(
        StatusCode::CONFLICT,
        codes::ATTEMPT_IN_PROGRESS,
        "An attempt is already in progress",
        serde_json::json!({ "attempt": body }),
    )
}

async fn fetch_assessment(state: &AppState, id: &str) -> Result<Assessment, ApiError> {
    assessments::find_by_id(state.db(), id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load assessment"))?
        .ok_or_else(|| ApiError::NotFound("Assessment not found".to_string()))
}
