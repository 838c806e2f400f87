// src/models/answer.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    #[default]
    Ungraded,
    Graded,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Ungraded => "ungraded",
            AnswerStatus::Graded => "graded",
        }
    }
}

impl fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ungraded" => Ok(AnswerStatus::Ungraded),
            "graded" => Ok(AnswerStatus::Graded),
            other => Err(format!("unknown answer status '{}'", other)),
        }
    }
}

/// A learner's answer to one question of one attempt.
/// Unique per (attempt_id, question_id); saves overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub answer_value: Option<String>,
    pub score: Option<f64>,

    /// Only set for auto-graded question types.
    pub is_correct: Option<bool>,

    /// Manual-grading feedback.
    pub feedback: Option<String>,

    pub status: AnswerStatus,
    pub updated_at: DateTime<Utc>,
}

/// An answer as returned to a viewer.
///
/// Grading results (score, correctness, feedback, status) are left out unless
/// `reveal_results` is set. Otherwise saving each option in turn would give
/// the key away.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerView {
    pub question_id: i64,
    pub answer_value: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AnswerStatus>,
}

impl AnswerView {
    pub fn new(answer: &StudentAnswer, reveal_results: bool) -> Self {
        Self {
            question_id: answer.question_id,
            answer_value: answer.answer_value.clone(),
            updated_at: answer.updated_at,
            score: answer.score.filter(|_| reveal_results),
            is_correct: answer.is_correct.filter(|_| reveal_results),
            feedback: answer.feedback.clone().filter(|_| reveal_results),
            status: reveal_results.then_some(answer.status),
        }
    }
}

/// Result of the automatic grading rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoGrade {
    pub is_correct: bool,
    pub score: f64,
}

/// DTO for saving (or staging) an answer.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[validate(length(max = 20000, message = "Answer is too long."))]
    pub value: String,
}

/// DTO for a grader scoring a subjective answer.
#[derive(Debug, Deserialize, Validate)]
pub struct GradeAnswerRequest {
    pub score: f64,
    #[validate(length(max = 5000, message = "Feedback is too long."))]
    pub feedback: Option<String>,
}
