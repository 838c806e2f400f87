// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes the attempt/grading failure taxonomy and its mapping to HTTP responses.
///
/// Every variant except `InternalServerError` is a validation failure: the
/// operation that returned it changed nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    // 403 Learner tried to start an exam that is not published
    ExamNotPublished,

    // 403 Now is outside the exam's configured start/end window
    WindowClosed,

    // 409 Mutation attempted while the attempt is not in progress
    AttemptClosed,

    // 409 Grading a graded (published) attempt
    AlreadyFinalized,

    // 409 Grading or finalizing an attempt that is still in progress
    NotSubmitted,

    // 400 Manual score outside [0, max]
    ScoreOutOfRange { max: f64 },

    // 409 Finalize requested while these questions still lack a score
    IncompleteGrading(Vec<i64>),

    // 400 Manual grade on an auto-gradable question
    NotGradable(i64),

    // 404 Not Found
    NotFound(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden
    Forbidden(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl AppError {
    /// Stable machine-readable code, used as the `code` field of error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ExamNotPublished => "exam_not_published",
            AppError::WindowClosed => "window_closed",
            AppError::AttemptClosed => "attempt_closed",
            AppError::AlreadyFinalized => "already_finalized",
            AppError::NotSubmitted => "not_submitted",
            AppError::ScoreOutOfRange { .. } => "score_out_of_range",
            AppError::IncompleteGrading(_) => "incomplete_grading",
            AppError::NotGradable(_) => "not_gradable",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::AuthError(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::InternalServerError(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::ExamNotPublished | AppError::WindowClosed | AppError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            AppError::AttemptClosed
            | AppError::AlreadyFinalized
            | AppError::NotSubmitted
            | AppError::IncompleteGrading(_) => StatusCode::CONFLICT,
            AppError::ScoreOutOfRange { .. }
            | AppError::NotGradable(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ExamNotPublished => write!(f, "Exam is not published"),
            AppError::WindowClosed => write!(f, "Exam is not open at this time"),
            AppError::AttemptClosed => write!(f, "Attempt is no longer in progress"),
            AppError::AlreadyFinalized => write!(f, "Attempt has already been finalized"),
            AppError::NotSubmitted => write!(f, "Attempt has not been submitted yet"),
            AppError::ScoreOutOfRange { max } => {
                write!(f, "Score must be between 0 and {}", max)
            }
            AppError::IncompleteGrading(ids) => {
                write!(f, "Questions without a score: {:?}", ids)
            }
            AppError::NotGradable(id) => {
                write!(f, "Question {} is graded automatically", id)
            }
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::InternalServerError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match &self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                json!({ "error": "Internal Server Error", "code": code })
            }
            AppError::IncompleteGrading(ids) => json!({
                "error": self.to_string(),
                "code": code,
                "question_ids": ids,
            }),
            _ => json!({ "error": self.to_string(), "code": code }),
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
