// src/models/score.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The official result of a finalized attempt.
/// Published once per attempt; this is what report cards read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub attempt_id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub total_score: f64,
    pub max_score: f64,
    pub per_question: Vec<QuestionScore>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_id: i64,
    pub score: f64,
}
