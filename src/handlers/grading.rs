// src/handlers/grading.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{engine::ExamEngine, error::AppError, models::answer::GradeAnswerRequest};

/// Scores a short-answer or essay question of a submitted attempt.
/// Graders only.
pub async fn grade_answer(
    State(engine): State<ExamEngine>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<GradeAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let answer = engine
        .grading
        .grade_answer(attempt_id, question_id, payload.score, payload.feedback)
        .await?;

    Ok(Json(answer))
}

/// Finalizes a fully graded attempt and publishes its official score.
/// Graders only.
pub async fn finalize_attempt(
    State(engine): State<ExamEngine>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = engine.grading.finalize(attempt_id).await?;
    Ok(Json(attempt))
}
