use sqlx::PgPool;

use crate::db::models::{Attempt, ItemResponse};
use crate::db::types::AttemptStatus;

const COLUMNS: &str = "\
    id, assessment_id, student_id, status, score, started_at, finished_at, created_at, updated_at";

const RESPONSE_COLUMNS: &str = "\
    id, attempt_id, question_id, selected_option_id, text_response, score, is_correct, \
    graded_at, created_at, updated_at";

/// Serializes concurrent starts for one (assessment, student) pair within the
/// current transaction. Released automatically at commit or rollback.
pub(crate) async fn acquire_start_lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    assessment_id: &str,
    student_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("attempt:{assessment_id}:{student_id}"))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM assessment_attempts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
    assessment_id: &str,
    student_id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM assessment_attempts \
         WHERE assessment_id = $1 AND student_id = $2 AND status = $3"
    ))
    .bind(assessment_id)
    .bind(student_id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_finished(
    executor: impl sqlx::PgExecutor<'_>,
    assessment_id: &str,
    student_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM assessment_attempts \
         WHERE assessment_id = $1 AND student_id = $2 AND status <> $3",
    )
    .bind(assessment_id)
    .bind(student_id)
    .bind(AttemptStatus::InProgress)
    .fetch_one(executor)
    .await
}

pub(crate) async fn last_finished_at(
    executor: impl sqlx::PgExecutor<'_>,
    assessment_id: &str,
    student_id: &str,
) -> Result<Option<time::PrimitiveDateTime>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT MAX(finished_at) FROM assessment_attempts \
         WHERE assessment_id = $1 AND student_id = $2 AND finished_at IS NOT NULL",
    )
    .bind(assessment_id)
    .bind(student_id)
    .fetch_one(executor)
    .await
}

pub(crate) struct CreateAttempt<'a> {
    pub(crate) id: &'a str,
    pub(crate) assessment_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) started_at: time::PrimitiveDateTime,
}

/// Insert guarded by the partial unique index on in-progress attempts.
/// Returns false when another in-progress attempt already holds the slot.
pub(crate) async fn create(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    params: CreateAttempt<'_>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO assessment_attempts (
            id, assessment_id, student_id, status, score, started_at, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,0,$5,$5,$5)
        ON CONFLICT DO NOTHING",
    )
    .bind(params.id)
    .bind(params.assessment_id)
    .bind(params.student_id)
    .bind(AttemptStatus::InProgress)
    .bind(params.started_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Closes an attempt: only fires while the row is still in progress, so
/// concurrent submit/sweep callers race safely. Zero rows means someone
/// else finished it first.
pub(crate) async fn finish(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    status: AttemptStatus,
    score: f64,
    finished_at: time::PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE assessment_attempts
         SET status = $1, score = $2, finished_at = $3, updated_at = $3
         WHERE id = $4 AND status = $5",
    )
    .bind(status)
    .bind(score)
    .bind(finished_at)
    .bind(id)
    .bind(AttemptStatus::InProgress)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn apply_grade(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    score: f64,
    graded_at: time::PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE assessment_attempts SET status = $1, score = $2, updated_at = $3
         WHERE id = $4 AND status = $5",
    )
    .bind(AttemptStatus::Graded)
    .bind(score)
    .bind(graded_at)
    .bind(id)
    .bind(AttemptStatus::Submitted)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// In-progress attempts whose deadline has already passed. Zero or negative
/// time limits never expire and are excluded here.
pub(crate) async fn list_overdue(
    pool: &PgPool,
    now: time::PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT a.{} FROM assessment_attempts a
         JOIN assessments q ON q.id = a.assessment_id
         WHERE a.status = $1
           AND q.time_limit_minutes > 0
           AND a.started_at + make_interval(mins => q.time_limit_minutes) < $2
         ORDER BY a.started_at
         LIMIT $3",
        COLUMNS.replace(", ", ", a."),
    ))
    .bind(AttemptStatus::InProgress)
    .bind(now)
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await
}

pub(crate) struct UpsertResponse<'a> {
    pub(crate) id: &'a str,
    pub(crate) attempt_id: &'a str,
    pub(crate) question_id: &'a str,
    pub(crate) selected_option_id: Option<&'a str>,
    pub(crate) text_response: Option<&'a str>,
    pub(crate) saved_at: time::PrimitiveDateTime,
}

/// Last write per question wins while the attempt is open.
pub(crate) async fn upsert_response(
    executor: impl sqlx::PgExecutor<'_>,
    params: UpsertResponse<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO item_responses (
            id, attempt_id, question_id, selected_option_id, text_response,
            score, is_correct, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,0,FALSE,$6,$6)
        ON CONFLICT (attempt_id, question_id) DO UPDATE SET
            selected_option_id = EXCLUDED.selected_option_id,
            text_response = EXCLUDED.text_response,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(params.id)
    .bind(params.attempt_id)
    .bind(params.question_id)
    .bind(params.selected_option_id)
    .bind(params.text_response)
    .bind(params.saved_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn responses_for(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<Vec<ItemResponse>, sqlx::Error> {
    sqlx::query_as::<_, ItemResponse>(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM item_responses WHERE attempt_id = $1"
    ))
    .bind(attempt_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn grade_response(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    score: f64,
    is_correct: bool,
    graded_at: time::PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE item_responses
         SET score = $1, is_correct = $2, graded_at = $3, updated_at = $3
         WHERE id = $4",
    )
    .bind(score)
    .bind(is_correct)
    .bind(graded_at)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::db::types::{GradingPolicy, UserRole};
    use crate::repositories::{assessments, users};
    use crate::test_support;
    use uuid::Uuid;

    // Runs against a live database when one is configured; everything happens
    // inside a rolled-back transaction so no rows survive the test.
    #[tokio::test]
    async fn at_most_one_in_progress_attempt_per_student() {
        let Some(pool) = test_support::test_pool().await else { return };
        let now = primitive_now_utc();
        let mut tx = pool.begin().await.expect("tx");

        let student_id = Uuid::new_v4().to_string();
        users::create(
            &mut *tx,
            users::CreateUser {
                id: &student_id,
                email: &format!("{student_id}@example.com"),
                hashed_password: "x".to_string(),
                full_name: "Test Student",
                role: UserRole::Student,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("student");

        let assessment = assessments::create(
            &mut tx,
            assessments::CreateAssessment {
                id: &Uuid::new_v4().to_string(),
                title: "Methods check",
                description: None,
                time_limit_minutes: 30,
                passing_score: 60.0,
                grading_policy: GradingPolicy::Automatic,
                shuffle_questions: false,
                available_from: None,
                available_until: None,
                max_attempts: 0,
                cooldown_minutes: 0,
                created_by: &student_id,
                created_at: now,
            },
        )
        .await
        .expect("assessment");

        let first_id = Uuid::new_v4().to_string();
        let inserted = create(
            &mut tx,
            CreateAttempt {
                id: &first_id,
                assessment_id: &assessment.id,
                student_id: &student_id,
                started_at: now,
            },
        )
        .await
        .expect("first attempt");
        assert!(inserted);

        let duplicate = create(
            &mut tx,
            CreateAttempt {
                id: &Uuid::new_v4().to_string(),
                assessment_id: &assessment.id,
                student_id: &student_id,
                started_at: now,
            },
        )
        .await
        .expect("duplicate attempt");
        assert!(!duplicate, "a second open attempt for the same pair must be rejected");

        let finished = finish(&mut *tx, &first_id, AttemptStatus::Submitted, 0.0, now)
            .await
            .expect("finish");
        assert!(finished);

        let restarted = create(
            &mut tx,
            CreateAttempt {
                id: &Uuid::new_v4().to_string(),
                assessment_id: &assessment.id,
                student_id: &student_id,
                started_at: now,
            },
        )
        .await
        .expect("restart attempt");
        assert!(restarted, "a finished attempt frees the in-progress slot");
    }
}
