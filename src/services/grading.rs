use std::collections::HashMap;

use sqlx::PgPool;
use tracing::info;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Attempt, ItemResponse, Question, QuestionOption};
use crate::db::types::{AttemptStatus, GradingPolicy, QuestionType};
use crate::repositories::{assessments, attempts};
use crate::services::attempt_clock;

/// Auto-gradable score for one response. Text questions stay at zero until a
/// reviewer grades them by hand.
pub(crate) fn score_response(
    question: &Question,
    options: &[QuestionOption],
    response: Option<&ItemResponse>,
) -> (f64, bool) {
    match question.question_type {
        QuestionType::Mcq | QuestionType::TrueFalse => {
            let selected = response.and_then(|r| r.selected_option_id.as_deref());
            let correct = selected
                .map(|id| options.iter().any(|o| o.id == id && o.is_correct))
                .unwrap_or(false);
            if correct {
                (question.points, true)
            } else {
                (0.0, false)
            }
        }
        QuestionType::Text => (0.0, false),
    }
}

/// Grades and closes an in-progress attempt. Idempotent: a terminal attempt
/// is returned unchanged, and the guarded finish update makes concurrent
/// submit/sweep callers converge on a single winner.
pub(crate) async fn finalize_attempt(
    pool: &PgPool,
    attempt: &Attempt,
) -> Result<Attempt, sqlx::Error> {
    if attempt.status.is_terminal() {
        return Ok(attempt.clone());
    }

    let questions = assessments::questions_for(pool, &attempt.assessment_id).await?;
    let options = assessments::options_by_question(pool, &attempt.assessment_id).await?;
    let responses: HashMap<String, ItemResponse> = attempts::responses_for(pool, &attempt.id)
        .await?
        .into_iter()
        .map(|r| (r.question_id.clone(), r))
        .collect();

    let now = primitive_now_utc();
    let mut earned = 0.0;
    let mut possible = 0.0;
    for question in &questions {
        possible += question.points;
        let response = responses.get(&question.id);
        let empty = Vec::new();
        let opts = options.get(&question.id).unwrap_or(&empty);
        let (score, is_correct) = score_response(question, opts, response);
        earned += score;
        if let Some(response) = response {
            attempts::grade_response(pool, &response.id, score, is_correct, now).await?;
        }
    }

    let percent = attempt_clock::score_percent(earned, possible);
    let assessment = assessments::find_by_id(pool, &attempt.assessment_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    let status = match assessment.grading_policy {
        GradingPolicy::Automatic => AttemptStatus::Graded,
        GradingPolicy::ManualReview => AttemptStatus::Submitted,
    };

    let finished = attempts::finish(pool, &attempt.id, status, percent, now).await?;
    if finished {
        info!(
            attempt_id = %attempt.id,
            assessment_id = %attempt.assessment_id,
            score = percent,
            status = ?status,
            "attempt finalized"
        );
    }

    // Re-read so a lost race still reports whatever the winner wrote.
    attempts::find_by_id(pool, &attempt.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn question(id: &str, kind: QuestionType, points: f64) -> Question {
        Question {
            id: id.to_string(),
            assessment_id: "asmt".to_string(),
            question_type: kind,
            stem: "stem".to_string(),
            points,
            sort_order: 0,
            created_at: primitive_now_utc(),
        }
    }

    fn option(id: &str, question_id: &str, is_correct: bool) -> QuestionOption {
        QuestionOption {
            id: id.to_string(),
            question_id: question_id.to_string(),
            label: "label".to_string(),
            is_correct,
            sort_order: 0,
        }
    }

    fn response(question_id: &str, selected: Option<&str>) -> ItemResponse {
        let now = primitive_now_utc();
        ItemResponse {
            id: "resp".to_string(),
            attempt_id: "att".to_string(),
            question_id: question_id.to_string(),
            selected_option_id: selected.map(str::to_string),
            text_response: None,
            score: 0.0,
            is_correct: false,
            graded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn correct_choice_earns_full_points() {
        let q = question("q1", QuestionType::Mcq, 2.5);
        let opts = vec![option("a", "q1", false), option("b", "q1", true)];
        let resp = response("q1", Some("b"));
        assert_eq!(score_response(&q, &opts, Some(&resp)), (2.5, true));
    }

    #[test]
    fn wrong_choice_earns_nothing() {
        let q = question("q1", QuestionType::TrueFalse, 1.0);
        let opts = vec![option("a", "q1", true), option("b", "q1", false)];
        let resp = response("q1", Some("b"));
        assert_eq!(score_response(&q, &opts, Some(&resp)), (0.0, false));
    }

    #[test]
    fn missing_response_earns_nothing() {
        let q = question("q1", QuestionType::Mcq, 1.0);
        let opts = vec![option("a", "q1", true)];
        assert_eq!(score_response(&q, &opts, None), (0.0, false));
    }

    #[test]
    fn text_question_waits_for_manual_grade() {
        let q = question("q1", QuestionType::Text, 5.0);
        let mut resp = response("q1", None);
        resp.text_response = Some("an essay".to_string());
        assert_eq!(score_response(&q, &[], Some(&resp)), (0.0, false));
    }
}
