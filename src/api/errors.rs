use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug, Serialize)]
struct CodedResponse {
    status: u16,
    error: String,
    code: &'static str,
    #[serde(flatten)]
    extra: serde_json::Value,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(&'static str),
    ServiceUnavailable(String),
    /// Policy and validation outcomes the caller branches on via `code`.
    /// `extra` is flattened into the body (`attempt`, `retry_after_seconds`,
    /// `missing_slots`, ...).
    Coded { status: StatusCode, code: &'static str, message: String, extra: serde_json::Value },
    Internal(String),
}

pub(crate) mod codes {
    pub(crate) const ATTEMPT_IN_PROGRESS: &str = "ATTEMPT_IN_PROGRESS";
    pub(crate) const COOLDOWN_ACTIVE: &str = "COOLDOWN_ACTIVE";
    pub(crate) const MAX_ATTEMPTS_REACHED: &str = "MAX_ATTEMPTS_REACHED";
    pub(crate) const ATTEMPT_AUTO_SUBMITTED: &str = "ATTEMPT_AUTO_SUBMITTED";
    pub(crate) const INCOMPLETE_SUBMISSION: &str = "INCOMPLETE_SUBMISSION";
    pub(crate) const GRAPH_INVALID: &str = "GRAPH_INVALID";
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub(crate) fn coded(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Coded { status, code, message: message.into(), extra: serde_json::json!({}) }
    }

    pub(crate) fn coded_with(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        extra: serde_json::Value,
    ) -> Self {
        Self::Coded { status, code, message: message.into(), extra }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let status = StatusCode::UNAUTHORIZED;
                let mut response = (
                    status,
                    Json(ErrorResponse { status: status.as_u16(), detail: message.to_string() }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => {
                let status = StatusCode::FORBIDDEN;
                (
                    status,
                    Json(ErrorResponse { status: status.as_u16(), detail: message.to_string() }),
                )
                    .into_response()
            }
            ApiError::BadRequest(message) => {
                let status = StatusCode::BAD_REQUEST;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::NotFound(message) => {
                let status = StatusCode::NOT_FOUND;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::Conflict(message) => {
                let status = StatusCode::CONFLICT;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::TooManyRequests(message) => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                (
                    status,
                    Json(ErrorResponse { status: status.as_u16(), detail: message.to_string() }),
                )
                    .into_response()
            }
            ApiError::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                let status = StatusCode::SERVICE_UNAVAILABLE;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
            ApiError::Coded { status, code, message, extra } => (
                status,
                Json(CodedResponse { status: status.as_u16(), error: message, code, extra }),
            )
                .into_response(),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Json(ErrorResponse { status: status.as_u16(), detail: message }))
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coded_body_flattens_extra_fields() {
        let error = ApiError::coded_with(
            StatusCode::CONFLICT,
            codes::ATTEMPT_IN_PROGRESS,
            "attempt already in progress",
            serde_json::json!({"attempt": {"id": "a-1"}}),
        );
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "ATTEMPT_IN_PROGRESS");
        assert_eq!(body["attempt"]["id"], "a-1");
        assert_eq!(body["status"], 409);
    }
}
