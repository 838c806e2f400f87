// src/models/report.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    answer::{AnswerStatus, AnswerView},
    attempt::{AttemptSession, ExamAttempt, SubmitReason},
    exam::PublicQuestion,
};

/// Response for starting or resuming an attempt.
#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub session: AttemptSession,
    pub attempt: ExamAttempt,
    pub questions: Vec<PublicQuestion>,
    pub answers: Vec<AnswerView>,
    /// `None` for untimed exams.
    pub remaining_seconds: Option<i64>,
}

/// Server-side view of the clock for one attempt.
#[derive(Debug, Serialize)]
pub struct TimeStatus {
    pub attempt: ExamAttempt,
    pub elapsed_seconds: i64,
    pub remaining_seconds: Option<i64>,
}

/// Review screen for one attempt.
#[derive(Debug, Serialize)]
pub struct AttemptReview {
    pub attempt: ExamAttempt,
    pub exam_title: String,
    pub max_score: f64,
    pub remaining_seconds: Option<i64>,
    pub items: Vec<ReviewItem>,
}

#[derive(Debug, Serialize)]
pub struct ReviewItem {
    pub question: PublicQuestion,
    /// Only revealed to graders, or to the learner once the attempt is graded.
    pub correct_answer: Option<String>,
    pub answer_value: Option<String>,
    /// Grading results follow the same rule as `correct_answer`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AnswerStatus>,
}

/// A submitted attempt waiting for a grader.
#[derive(Debug, Serialize)]
pub struct GradingQueueEntry {
    pub attempt_id: i64,
    pub student_id: i64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submit_reason: Option<SubmitReason>,
    pub violation_count: i64,
    /// Sum of scores already assigned (automatic and manual).
    pub scored_so_far: f64,
    /// Questions that still need a manual score.
    pub pending_question_ids: Vec<i64>,
    pub ready_to_finalize: bool,
}

/// Row of the scores list for graded attempts.
#[derive(Debug, Serialize)]
pub struct ScoreListEntry {
    pub attempt_id: i64,
    pub student_id: i64,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub violation_count: i64,
}

/// Outcome of reporting a proctoring violation through the learner flow.
#[derive(Debug, Serialize)]
pub struct ViolationOutcome {
    pub violation_count: i64,
    pub threshold: i64,
    /// Set when this violation forced the submission.
    pub submitted: Option<ExamAttempt>,
}
