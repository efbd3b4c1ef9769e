use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Assessment, Attempt, ItemResponse, Question, QuestionOption};
use crate::db::types::{AttemptStatus, GradingPolicy, QuestionType};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct OptionCreate {
    #[validate(length(min = 1, message = "label must not be empty"))]
    pub(crate) label: String,
    #[serde(default)]
    #[serde(alias = "isCorrect")]
    pub(crate) is_correct: bool,
    #[serde(default)]
    #[serde(alias = "sortOrder")]
    pub(crate) sort_order: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[serde(alias = "questionType")]
    pub(crate) question_type: QuestionType,
    #[validate(length(min = 1, message = "stem must not be empty"))]
    pub(crate) stem: String,
    #[serde(default = "default_points")]
    #[validate(range(exclusive_min = 0.0, message = "points must be positive"))]
    pub(crate) points: f64,
    #[serde(default)]
    #[serde(alias = "sortOrder")]
    pub(crate) sort_order: i32,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) options: Vec<OptionCreate>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AssessmentCreate {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    #[serde(alias = "timeLimitMinutes")]
    #[validate(range(min = 0, message = "time_limit_minutes must be non-negative"))]
    pub(crate) time_limit_minutes: i32,
    #[serde(default)]
    #[serde(alias = "passingScore")]
    #[validate(range(min = 0.0, max = 100.0, message = "passing_score must be 0..=100"))]
    pub(crate) passing_score: f64,
    #[serde(default = "default_policy")]
    #[serde(alias = "gradingPolicy")]
    pub(crate) grading_policy: GradingPolicy,
    #[serde(default)]
    #[serde(alias = "shuffleQuestions")]
    pub(crate) shuffle_questions: bool,
    #[serde(
        default,
        alias = "availableFrom",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) available_from: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "availableUntil",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) available_until: Option<OffsetDateTime>,
    #[serde(default)]
    #[serde(alias = "maxAttempts")]
    #[validate(range(min = 0, message = "max_attempts must be non-negative"))]
    pub(crate) max_attempts: i32,
    #[serde(default)]
    #[serde(alias = "cooldownMinutes")]
    #[validate(range(min = 0, message = "cooldown_minutes must be non-negative"))]
    pub(crate) cooldown_minutes: i32,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionCreate>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AssessmentResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) time_limit_minutes: i32,
    pub(crate) passing_score: f64,
    pub(crate) grading_policy: GradingPolicy,
    pub(crate) shuffle_questions: bool,
    pub(crate) available_from: Option<String>,
    pub(crate) available_until: Option<String>,
    pub(crate) max_attempts: i32,
    pub(crate) cooldown_minutes: i32,
    pub(crate) created_at: String,
}

impl AssessmentResponse {
    pub(crate) fn from_db(assessment: Assessment) -> Self {
        Self {
            id: assessment.id,
            title: assessment.title,
            description: assessment.description,
            time_limit_minutes: assessment.time_limit_minutes,
            passing_score: assessment.passing_score,
            grading_policy: assessment.grading_policy,
            shuffle_questions: assessment.shuffle_questions,
            available_from: assessment.available_from.map(format_primitive),
            available_until: assessment.available_until.map(format_primitive),
            max_attempts: assessment.max_attempts,
            cooldown_minutes: assessment.cooldown_minutes,
            created_at: format_primitive(assessment.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) score: f64,
    pub(crate) passed: Option<bool>,
    pub(crate) started_at: String,
    pub(crate) finished_at: Option<String>,
    pub(crate) remaining_seconds: Option<i64>,
}

impl AttemptResponse {
    pub(crate) fn from_db(attempt: Attempt, assessment: &Assessment) -> Self {
        let remaining_seconds = if attempt.status == AttemptStatus::InProgress {
            crate::services::attempt_clock::remaining_seconds(
                attempt.started_at,
                assessment.time_limit_minutes,
                crate::core::time::primitive_now_utc(),
            )
        } else {
            None
        };
        let passed = (attempt.status == AttemptStatus::Graded)
            .then(|| crate::services::attempt_clock::passed(attempt.score, assessment.passing_score));
        Self {
            id: attempt.id,
            assessment_id: attempt.assessment_id,
            status: attempt.status,
            score: attempt.score,
            passed,
            started_at: format_primitive(attempt.started_at),
            finished_at: attempt.finished_at.map(format_primitive),
            remaining_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OptionView {
    pub(crate) id: String,
    pub(crate) label: String,
    pub(crate) sort_order: i32,
    /// Withheld while the attempt is still open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_correct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionView {
    pub(crate) id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) stem: String,
    pub(crate) points: f64,
    pub(crate) options: Vec<OptionView>,
}

impl QuestionView {
    pub(crate) fn from_db(
        question: Question,
        options: Vec<QuestionOption>,
        reveal_answers: bool,
    ) -> Self {
        Self {
            id: question.id,
            question_type: question.question_type,
            stem: question.stem,
            points: question.points,
            options: options
                .into_iter()
                .map(|o| OptionView {
                    id: o.id,
                    label: o.label,
                    sort_order: o.sort_order,
                    is_correct: reveal_answers.then_some(o.is_correct),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseView {
    pub(crate) question_id: String,
    pub(crate) selected_option_id: Option<String>,
    pub(crate) text_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_correct: Option<bool>,
}

impl ResponseView {
    pub(crate) fn from_db(response: ItemResponse, reveal_answers: bool) -> Self {
        Self {
            question_id: response.question_id,
            selected_option_id: response.selected_option_id,
            text_response: response.text_response,
            score: reveal_answers.then_some(response.score),
            is_correct: reveal_answers.then_some(response.is_correct),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptDetailResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) assessment: AssessmentResponse,
    pub(crate) questions: Vec<QuestionView>,
    pub(crate) responses: Vec<ResponseView>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ResponseSubmit {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[serde(default)]
    #[serde(alias = "optionId")]
    pub(crate) option_id: Option<String>,
    #[serde(default)]
    #[serde(alias = "textResponse")]
    pub(crate) text_response: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeItem {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[validate(range(min = 0.0, message = "score must be non-negative"))]
    pub(crate) score: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeRequest {
    #[validate(nested)]
    pub(crate) items: Vec<GradeItem>,
}

fn default_points() -> f64 {
    1.0
}

fn default_policy() -> GradingPolicy {
    GradingPolicy::Automatic
}

fn deserialize_option_offset_datetime_flexible<'de, D>(
    deserializer: D,
) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(value) => parse_offset_datetime_flexible(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid datetime: {value}")))
            .map(Some),
        None => Ok(None),
    }
}

fn parse_offset_datetime_flexible(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    // datetime-local inputs often arrive without a timezone.
    if (raw.len() == 16 || raw.len() == 19) && raw.as_bytes().get(10) == Some(&b'T') {
        let candidate = if raw.len() == 16 {
            format!("{raw}:00Z")
        } else {
            format!("{raw}Z")
        };
        if let Ok(value) = OffsetDateTime::parse(&candidate, &Rfc3339) {
            return Some(value);
        }
    }

    PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
        .ok()
        .map(|value| value.assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_naive_datetimes() {
        assert!(parse_offset_datetime_flexible("2026-03-01T10:00:00Z").is_some());
        assert!(parse_offset_datetime_flexible("2026-03-01T10:00").is_some());
        assert!(parse_offset_datetime_flexible("2026-03-01T10:00:00").is_some());
        assert!(parse_offset_datetime_flexible("not a date").is_none());
    }

    #[test]
    fn assessment_create_accepts_camel_case_aliases() {
        let payload = serde_json::json!({
            "title": "Methods check",
            "timeLimitMinutes": 30,
            "passingScore": 60.0,
            "gradingPolicy": "AUTOMATIC",
            "maxAttempts": 3,
            "cooldownMinutes": 15,
            "questions": [{
                "questionType": "MCQ",
                "stem": "Pick one",
                "options": [
                    {"label": "a", "isCorrect": true},
                    {"label": "b"}
                ]
            }]
        });
        let parsed: AssessmentCreate = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.time_limit_minutes, 30);
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].options[0].is_correct, true);
        assert!(parsed.validate().is_ok());
    }
}
