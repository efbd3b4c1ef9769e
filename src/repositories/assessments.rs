use std::collections::HashMap;

use sqlx::PgPool;

use crate::db::models::{Assessment, Question, QuestionOption};
use crate::db::types::{GradingPolicy, QuestionType};

const COLUMNS: &str = "\
    id, title, description, time_limit_minutes, passing_score, grading_policy, \
    shuffle_questions, available_from, available_until, max_attempts, cooldown_minutes, \
    created_by, created_at, updated_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Assessment>, sqlx::Error> {
    sqlx::query_as::<_, Assessment>(&format!("SELECT {COLUMNS} FROM assessments WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list(pool: &PgPool) -> Result<Vec<Assessment>, sqlx::Error> {
    sqlx::query_as::<_, Assessment>(&format!(
        "SELECT {COLUMNS} FROM assessments ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateAssessment<'a> {
    pub(crate) id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) description: Option<&'a str>,
    pub(crate) time_limit_minutes: i32,
    pub(crate) passing_score: f64,
    pub(crate) grading_policy: GradingPolicy,
    pub(crate) shuffle_questions: bool,
    pub(crate) available_from: Option<time::PrimitiveDateTime>,
    pub(crate) available_until: Option<time::PrimitiveDateTime>,
    pub(crate) max_attempts: i32,
    pub(crate) cooldown_minutes: i32,
    pub(crate) created_by: &'a str,
    pub(crate) created_at: time::PrimitiveDateTime,
}

pub(crate) async fn create(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    params: CreateAssessment<'_>,
) -> Result<Assessment, sqlx::Error> {
    sqlx::query_as::<_, Assessment>(&format!(
        "INSERT INTO assessments (
            id, title, description, time_limit_minutes, passing_score, grading_policy,
            shuffle_questions, available_from, available_until, max_attempts, cooldown_minutes,
            created_by, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$13)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.title)
    .bind(params.description)
    .bind(params.time_limit_minutes)
    .bind(params.passing_score)
    .bind(params.grading_policy)
    .bind(params.shuffle_questions)
    .bind(params.available_from)
    .bind(params.available_until)
    .bind(params.max_attempts)
    .bind(params.cooldown_minutes)
    .bind(params.created_by)
    .bind(params.created_at)
    .fetch_one(&mut **tx)
    .await
}

pub(crate) struct CreateQuestion<'a> {
    pub(crate) id: &'a str,
    pub(crate) assessment_id: &'a str,
    pub(crate) question_type: QuestionType,
    pub(crate) stem: &'a str,
    pub(crate) points: f64,
    pub(crate) sort_order: i32,
    pub(crate) created_at: time::PrimitiveDateTime,
}

pub(crate) async fn insert_question(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    params: CreateQuestion<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO questions (id, assessment_id, question_type, stem, points, sort_order, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7)",
    )
    .bind(params.id)
    .bind(params.assessment_id)
    .bind(params.question_type)
    .bind(params.stem)
    .bind(params.points)
    .bind(params.sort_order)
    .bind(params.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn insert_option(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    question_id: &str,
    label: &str,
    is_correct: bool,
    sort_order: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO question_options (id, question_id, label, is_correct, sort_order)
         VALUES ($1,$2,$3,$4,$5)",
    )
    .bind(id)
    .bind(question_id)
    .bind(label)
    .bind(is_correct)
    .bind(sort_order)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn questions_for(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(
        "SELECT id, assessment_id, question_type, stem, points, sort_order, created_at
         FROM questions WHERE assessment_id = $1 ORDER BY sort_order, id",
    )
    .bind(assessment_id)
    .fetch_all(pool)
    .await
}

/// Options for every question of an assessment, keyed by question id.
pub(crate) async fn options_by_question(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<HashMap<String, Vec<QuestionOption>>, sqlx::Error> {
    let rows = sqlx::query_as::<_, QuestionOption>(
        "SELECT o.id, o.question_id, o.label, o.is_correct, o.sort_order
         FROM question_options o
         JOIN questions q ON q.id = o.question_id
         WHERE q.assessment_id = $1
         ORDER BY o.sort_order, o.id",
    )
    .bind(assessment_id)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<String, Vec<QuestionOption>> = HashMap::new();
    for row in rows {
        grouped.entry(row.question_id.clone()).or_default().push(row);
    }
    Ok(grouped)
}
