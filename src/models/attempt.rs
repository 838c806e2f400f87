// src/models/attempt.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempt lifecycle: `in_progress -> submitted -> graded`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Graded => "graded",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "submitted" => Ok(AttemptStatus::Submitted),
            "graded" => Ok(AttemptStatus::Graded),
            other => Err(format!("unknown attempt status '{}'", other)),
        }
    }
}

/// Why an attempt left `in_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    Timeout,
    Forced,
}

impl SubmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitReason::Manual => "manual",
            SubmitReason::Timeout => "timeout",
            SubmitReason::Forced => "forced",
        }
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SubmitReason::Manual),
            "timeout" => Ok(SubmitReason::Timeout),
            "forced" => Ok(SubmitReason::Forced),
            other => Err(format!("unknown submit reason '{}'", other)),
        }
    }
}

/// One learner's instance of taking one exam.
/// Unique per (exam_id, student_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamAttempt {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub status: AttemptStatus,

    /// Set once on creation.
    pub started_at: DateTime<Utc>,

    /// Set once on submission.
    pub submitted_at: Option<DateTime<Utc>>,

    pub time_spent_seconds: i64,
    pub violation_count: i64,

    /// `None` until graded.
    pub total_score: Option<f64>,

    pub submit_reason: Option<SubmitReason>,
}

impl ExamAttempt {
    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }
}

/// Fields for a freshly started attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub exam_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
}

/// The one-shot `in_progress -> submitted` update.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionMark {
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i64,
    pub reason: SubmitReason,
}

/// Explicit session value handed to the learner's client.
/// The countdown is a pure function of `(now, started_at, duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttemptSession {
    pub attempt_id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
}

impl AttemptSession {
    pub fn new(attempt: &ExamAttempt, duration_seconds: Option<i64>) -> Self {
        Self {
            attempt_id: attempt.id,
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
            started_at: attempt.started_at,
            duration_seconds,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.duration_seconds
            .map(|d| self.started_at + chrono::Duration::seconds(d))
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        crate::engine::timing::remaining_seconds(self.started_at, self.duration_seconds, now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        crate::engine::timing::is_expired(self.started_at, self.duration_seconds, now)
    }
}
