// src/engine/store.rs

//! Contracts for the collaborators the engine drives.
//!
//! Implementations must make each call all-or-nothing: if a call returns
//! `Ok`, the described change happened; if it returns `Err`, nothing changed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    models::{
        answer::{AutoGrade, StudentAnswer},
        attempt::{ExamAttempt, NewAttempt, SubmissionMark},
        exam::Exam,
        score::ScoreRecord,
    },
};

/// Read-only exam metadata and questions.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError>;
}

/// Durable attempts, unique per (exam_id, student_id).
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn get(&self, attempt_id: i64) -> Result<Option<ExamAttempt>, AppError>;

    async fn find(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError>;

    /// Inserts a new attempt, or returns the existing one for the same
    /// (exam, student) pair. The bool is `true` when a row was created.
    async fn create_or_get(&self, new: NewAttempt) -> Result<(ExamAttempt, bool), AppError>;

    /// Atomically adds one violation to an in-progress attempt.
    /// Returns the new count, or `None` if the attempt is not in progress.
    async fn increment_violations(&self, attempt_id: i64) -> Result<Option<i64>, AppError>;

    /// `in_progress -> submitted`. Returns `None` if the attempt was not in progress.
    async fn mark_submitted(
        &self,
        attempt_id: i64,
        mark: SubmissionMark,
    ) -> Result<Option<ExamAttempt>, AppError>;

    async fn list_by_exam(&self, exam_id: i64) -> Result<Vec<ExamAttempt>, AppError>;
}

/// Durable answers, unique per (attempt_id, question_id).
#[async_trait]
pub trait AnswerStore: Send + Sync {
    async fn list(&self, attempt_id: i64) -> Result<Vec<StudentAnswer>, AppError>;

    async fn get(
        &self,
        attempt_id: i64,
        question_id: i64,
    ) -> Result<Option<StudentAnswer>, AppError>;

    /// Creates empty rows for questions that have none yet. Existing rows are untouched.
    async fn ensure(
        &self,
        attempt_id: i64,
        question_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Overwrites the answer value. `grade` carries the save-time automatic
    /// result for objective questions and clears it otherwise.
    async fn upsert_value(
        &self,
        attempt_id: i64,
        question_id: i64,
        value: &str,
        grade: Option<AutoGrade>,
        at: DateTime<Utc>,
    ) -> Result<StudentAnswer, AppError>;

    /// Stores an automatic grade and marks the answer graded.
    async fn record_auto_grade(
        &self,
        attempt_id: i64,
        question_id: i64,
        grade: AutoGrade,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Stores a manual score and feedback and marks the answer graded.
    async fn record_manual_grade(
        &self,
        attempt_id: i64,
        question_id: i64,
        score: f64,
        feedback: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StudentAnswer, AppError>;
}

/// Receiver of official results.
///
/// `publish` stores the record and moves the attempt `submitted -> graded`
/// with `total_score` as one atomic step: either both happen or neither does.
/// Returns `None`, changing nothing, if the attempt was not `submitted`, so a
/// retried or racing publish never creates a second record.
#[async_trait]
pub trait ScorePublisher: Send + Sync {
    async fn publish(&self, record: &ScoreRecord) -> Result<Option<ExamAttempt>, AppError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationEvent {
    pub attempt_id: i64,
    pub student_id: i64,
    pub violation_count: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Best-effort reporting channel for proctoring violations.
/// Failures are logged by the caller and never reach the learner.
#[async_trait]
pub trait ViolationSink: Send + Sync {
    async fn report(&self, event: &ViolationEvent) -> Result<(), AppError>;
}

/// Violation sink that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingViolationSink;

#[async_trait]
impl ViolationSink for TracingViolationSink {
    async fn report(&self, event: &ViolationEvent) -> Result<(), AppError> {
        tracing::warn!(
            attempt_id = event.attempt_id,
            student_id = event.student_id,
            count = event.violation_count,
            "Proctoring violation recorded"
        );
        Ok(())
    }
}
