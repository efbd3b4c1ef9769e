use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::{codes, ApiError};
use crate::api::guards::{CurrentReviewer, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Assessment, Attempt, Question, User};
use crate::db::types::{AttemptStatus, UserRole};
use crate::repositories::{assessments, attempts};
use crate::schemas::assessment::{
    AssessmentResponse, AttemptDetailResponse, AttemptResponse, GradeRequest, QuestionView,
    ResponseSubmit, ResponseView,
};
use crate::services::{attempt_clock, grading};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(detail))
        .route("/:id/response", post(submit_response))
        .route("/:id/complete", post(complete))
        .route("/:id/grade", post(grade))
}

/// Attempt detail. Reading an overdue attempt finalizes it first, so the
/// response always reflects the server-owned deadline. Correct answers and
/// per-question scores stay hidden while the attempt is open.
async fn detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<AttemptDetailResponse>, ApiError> {
    let (mut attempt, assessment) = load_attempt(&state, &id, &user).await?;

    if attempt.status == AttemptStatus::InProgress
        && attempt_clock::is_expired(
            attempt.started_at,
            assessment.time_limit_minutes,
            primitive_now_utc(),
        )
    {
        attempt = grading::finalize_attempt(state.db(), &attempt)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to finalize overdue attempt"))?;
    }

    let reveal = attempt.status != AttemptStatus::InProgress;

    let mut questions = assessments::questions_for(state.db(), &assessment.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load questions"))?;
    if assessment.shuffle_questions {
        shuffle_stable(&mut questions, &attempt.id);
    }

    let mut options = assessments::options_by_question(state.db(), &assessment.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load question options"))?;

    let question_views = questions
        .into_iter()
        .map(|question| {
            let opts = options.remove(&question.id).unwrap_or_default();
            QuestionView::from_db(question, opts, reveal)
        })
        .collect();

    let responses = attempts::responses_for(state.db(), &attempt.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load responses"))?
        .into_iter()
        .map(|response| ResponseView::from_db(response, reveal))
        .collect();

    Ok(Json(AttemptDetailResponse {
        attempt: AttemptResponse::from_db(attempt, &assessment),
        assessment: AssessmentResponse::from_db(assessment),
        questions: question_views,
        responses,
    }))
}

/// Records one answer, last write per question wins. Past the deadline the
/// attempt is auto-submitted instead and the caller must re-fetch.
async fn submit_response(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<ResponseSubmit>,
) -> Result<StatusCode, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (attempt, assessment) = load_attempt(&state, &id, &user).await?;
    ensure_attempt_owner(&attempt, &user)?;
    if attempt.status != AttemptStatus::InProgress {
        return Err(ApiError::Conflict("Attempt is not in progress".to_string()));
    }

    if attempt_clock::is_expired(
        attempt.started_at,
        assessment.time_limit_minutes,
        primitive_now_utc(),
    ) {
        let finalized = grading::finalize_attempt(state.db(), &attempt)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to finalize overdue attempt"))?;
        return Err(ApiError::coded_with(
            StatusCode::CONFLICT,
            codes::ATTEMPT_AUTO_SUBMITTED,
            "Time limit elapsed, the attempt was submitted",
            serde_json::json!({ "attempt": { "id": finalized.id } }),
        ));
    }

    let questions = assessments::questions_for(state.db(), &assessment.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load questions"))?;
    let question = questions
        .iter()
        .find(|question| question.id == payload.question_id)
        .ok_or_else(|| {
            ApiError::BadRequest("Question does not belong to this assessment".to_string())
        })?;

    if let Some(option_id) = payload.option_id.as_deref() {
        let options = assessments::options_by_question(state.db(), &assessment.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load question options"))?;
        let belongs = options
            .get(&question.id)
            .map(|opts| opts.iter().any(|option| option.id == option_id))
            .unwrap_or(false);
        if !belongs {
            return Err(ApiError::BadRequest(
                "Option does not belong to this question".to_string(),
            ));
        }
    }

    attempts::upsert_response(
        state.db(),
        attempts::UpsertResponse {
            id: &Uuid::new_v4().to_string(),
            attempt_id: &attempt.id,
            question_id: &payload.question_id,
            selected_option_id: payload.option_id.as_deref(),
            text_response: payload.text_response.as_deref(),
            saved_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to record response"))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Explicit hand-in. Completing an already-terminal attempt is a no-op.
async fn complete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (attempt, _assessment) = load_attempt(&state, &id, &user).await?;
    ensure_attempt_owner(&attempt, &user)?;

    grading::finalize_attempt(state.db(), &attempt)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to finalize attempt"))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Manual grading for `MANUAL_REVIEW` assessments: per-question scores from a
/// reviewer move the attempt from `SUBMITTED` to `GRADED`.
async fn grade(
    State(state): State<AppState>,
    CurrentReviewer(_reviewer): CurrentReviewer,
    Path(id): Path<String>,
    Json(payload): Json<GradeRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let attempt = fetch_attempt(&state, &id).await?;
    if attempt.status != AttemptStatus::Submitted {
        return Err(ApiError::Conflict("Only submitted attempts can be graded".to_string()));
    }
    let assessment = assessments::find_by_id(state.db(), &attempt.assessment_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load assessment"))?
        .ok_or_else(|| ApiError::NotFound("Assessment not found".to_string()))?;

    let questions: HashMap<String, Question> =
        assessments::questions_for(state.db(), &assessment.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load questions"))?
            .into_iter()
            .map(|question| (question.id.clone(), question))
            .collect();
    let responses: HashMap<String, String> = attempts::responses_for(state.db(), &attempt.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load responses"))?
        .into_iter()
        .map(|response| (response.question_id.clone(), response.id))
        .collect();

    let now = primitive_now_utc();
    for item in &payload.items {
        let question = questions.get(&item.question_id).ok_or_else(|| {
            ApiError::BadRequest("Question does not belong to this assessment".to_string())
        })?;
        if item.score > question.points {
            return Err(ApiError::BadRequest(format!(
                "Score for question '{}' exceeds its {} points",
                question.stem, question.points
            )));
        }
        let Some(response_id) = responses.get(&item.question_id) else {
            return Err(ApiError::BadRequest(format!(
                "No response recorded for question '{}'",
                question.stem
            )));
        };
        attempts::grade_response(
            state.db(),
            response_id,
            item.score,
            item.score >= question.points,
            now,
        )
        .await
        .map_err(|e| ApiError::internal(e, "Failed to record grade"))?;
    }

    // Recompute the attempt score from the full response set.
    let earned: f64 = attempts::responses_for(state.db(), &attempt.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reload responses"))?
        .iter()
        .map(|response| response.score)
        .sum();
    let possible: f64 = questions.values().map(|question| question.points).sum();
    let percent = attempt_clock::score_percent(earned, possible);

    let applied = attempts::apply_grade(state.db(), &attempt.id, percent, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to apply grade"))?;
    if !applied {
        return Err(ApiError::Conflict("Attempt was graded concurrently".to_string()));
    }

    let graded = fetch_attempt(&state, &attempt.id).await?;
    Ok(Json(AttemptResponse::from_db(graded, &assessment)))
}

/// Stable per-attempt question order: the same attempt always sees the same
/// shuffle, different attempts see different ones.
fn shuffle_stable(questions: &mut [Question], attempt_id: &str) {
    let mut hasher = DefaultHasher::new();
    attempt_id.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    questions.shuffle(&mut rng);
}

async fn fetch_attempt(state: &AppState, id: &str) -> Result<Attempt, ApiError> {
    attempts::find_by_id(state.db(), id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load attempt"))?
        .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))
}

/// Mutating attempt endpoints are reserved for the attempt's owner; staff
/// may read an attempt but never answer or hand in on a student's behalf.
fn ensure_attempt_owner(attempt: &Attempt, user: &User) -> Result<(), ApiError> {
    if attempt.student_id == user.id {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Not your attempt"))
    }
}

async fn load_attempt(
    state: &AppState,
    id: &str,
    user: &User,
) -> Result<(Attempt, Assessment), ApiError> {
    let attempt = fetch_attempt(state, id).await?;
    if user.role == UserRole::Student && attempt.student_id != user.id {
        return Err(ApiError::Forbidden("Not your attempt"));
    }
    let assessment = assessments::find_by_id(state.db(), &attempt.assessment_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load assessment"))?
        .ok_or_else(|| ApiError::NotFound("Assessment not found".to_string()))?;
    Ok((attempt, assessment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::QuestionType;

    fn user(id: &str, role: UserRole) -> User {
        let now = primitive_now_utc();
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            hashed_password: "x".to_string(),
            full_name: id.to_string(),
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn attempt(student_id: &str) -> Attempt {
        let now = primitive_now_utc();
        Attempt {
            id: "att-1".to_string(),
            assessment_id: "asmt".to_string(),
            student_id: student_id.to_string(),
            status: AttemptStatus::InProgress,
            score: 0.0,
            started_at: now,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_the_owner_may_mutate_an_attempt() {
        let open = attempt("student-1");

        assert!(ensure_attempt_owner(&open, &user("student-1", UserRole::Student)).is_ok());
        assert!(ensure_attempt_owner(&open, &user("student-2", UserRole::Student)).is_err());
        assert!(ensure_attempt_owner(&open, &user("reviewer-1", UserRole::Reviewer)).is_err());
        assert!(ensure_attempt_owner(&open, &user("admin-1", UserRole::Admin)).is_err());
    }

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            assessment_id: "asmt".to_string(),
            question_type: QuestionType::Mcq,
            stem: id.to_string(),
            points: 1.0,
            sort_order: 0,
            created_at: primitive_now_utc(),
        }
    }

    #[test]
    fn shuffle_is_stable_per_attempt() {
        let base: Vec<Question> = (0..16).map(|i| question(&format!("q{i}"))).collect();

        let mut first = base.clone();
        shuffle_stable(&mut first, "attempt-1");
        let mut second = base.clone();
        shuffle_stable(&mut second, "attempt-1");
        let order = |qs: &[Question]| qs.iter().map(|q| q.id.clone()).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));

        let mut other = base.clone();
        shuffle_stable(&mut other, "attempt-2");
        assert_ne!(order(&first), order(&other));
    }
}
