// src/handlers/attempt.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    engine::ExamEngine,
    error::AppError,
    models::{
        answer::{AnswerView, SaveAnswerRequest},
        exam::PublicQuestion,
        report::StartAttemptResponse,
        user::Caller,
    },
};

/// Starts the caller's attempt at an exam, or resumes it.
///
/// * Creates the attempt on first call; later calls return the same attempt
///   with its saved answers and the server-computed remaining time.
/// * Questions are returned without answer keys.
pub async fn start_attempt(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let started = engine
        .controller
        .start(exam_id, caller.user_id, &caller)
        .await?;

    let questions: Vec<PublicQuestion> = started
        .exam
        .questions
        .iter()
        .map(PublicQuestion::from)
        .collect();
    let reveal = caller.sees_results(&started.attempt);
    let answers = started
        .answers
        .iter()
        .map(|a| AnswerView::new(a, reveal))
        .collect();

    Ok(Json(StartAttemptResponse {
        session: started.session,
        attempt: started.attempt,
        questions,
        answers,
        remaining_seconds: started.remaining_seconds,
    }))
}

/// Returns the server-side countdown. Submits the attempt if time is up.
pub async fn time_status(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    engine.controller.authorize(attempt_id, &caller).await?;
    let status = engine.controller.time_status(attempt_id).await?;
    Ok(Json(status))
}

/// Saves one answer immediately. Learners get their value back without the
/// auto-grade result.
pub async fn save_answer(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let attempt = engine.controller.authorize(attempt_id, &caller).await?;

    let answer = engine
        .controller
        .save_answer(attempt_id, question_id, &payload.value)
        .await?;

    Ok(Json(AnswerView::new(&answer, caller.sees_results(&attempt))))
}

/// Stages a draft answer. Rapid drafts for the same question coalesce into
/// one write after the debounce period.
pub async fn stage_answer(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    engine.controller.authorize(attempt_id, &caller).await?;

    engine
        .controller
        .stage_answer(attempt_id, question_id, payload.value)
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// Reports a proctoring violation (e.g. the learner left the exam view).
/// Reaching the threshold submits the attempt immediately.
pub async fn report_violation(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    engine.controller.authorize(attempt_id, &caller).await?;
    let outcome = engine.flow.report_violation(attempt_id).await?;
    Ok(Json(outcome))
}

/// Submits the attempt. Repeated calls return the same submission.
pub async fn submit_attempt(
    State(engine): State<ExamEngine>,
    Extension(caller): Extension<Caller>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    engine.controller.authorize(attempt_id, &caller).await?;
    let attempt = engine.flow.submit(attempt_id).await?;
    Ok(Json(attempt))
}
