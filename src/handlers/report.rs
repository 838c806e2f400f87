// src/handlers/report.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{engine::ExamEngine, error::AppError, models::user::Caller};

/// Review screen for one attempt.
pub async fn review_attempt(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    engine.controller.authorize(attempt_id, &caller).await?;
    let review = engine.projection.review(attempt_id, &caller).await?;
    Ok(Json(review))
}

/// Submitted attempts waiting for manual grading.
///
/// Abandoned attempts whose time ran out are submitted first so they show up.
pub async fn grading_queue(
    State(engine): State<ExamEngine>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let expired = engine.controller.expire_overdue(exam_id).await?;
    if !expired.is_empty() {
        tracing::info!(exam_id, count = expired.len(), "Submitted overdue attempts");
    }

    let queue = engine.projection.grading_queue(exam_id).await?;
    Ok(Json(queue))
}

/// Official scores of an exam.
pub async fn list_scores(
    State(engine): State<ExamEngine>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let scores = engine.projection.scores(exam_id).await?;
    Ok(Json(scores))
}
