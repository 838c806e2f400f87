// src/models/exam.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of question types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Essay,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::Essay => "essay",
        }
    }

    /// Whether correctness can be computed without a human grader.
    pub fn is_auto_gradable(&self) -> bool {
        matches!(self, QuestionType::MultipleChoice | QuestionType::TrueFalse)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "true_false" => Ok(QuestionType::TrueFalse),
            "short_answer" => Ok(QuestionType::ShortAnswer),
            "essay" => Ok(QuestionType::Essay),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

/// Type-specific question data. Only objective kinds carry a correct answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,
        correct_answer: String,
    },
    TrueFalse {
        correct_answer: bool,
    },
    ShortAnswer,
    Essay,
}

pub const TRUE_ANSWER: &str = "True";
pub const FALSE_ANSWER: &str = "False";

impl QuestionKind {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionKind::MultipleChoice { .. } => QuestionType::MultipleChoice,
            QuestionKind::TrueFalse { .. } => QuestionType::TrueFalse,
            QuestionKind::ShortAnswer => QuestionType::ShortAnswer,
            QuestionKind::Essay => QuestionType::Essay,
        }
    }

    /// The exact string a learner must submit to be marked correct.
    pub fn correct_answer(&self) -> Option<&str> {
        match self {
            QuestionKind::MultipleChoice { correct_answer, .. } => Some(correct_answer),
            QuestionKind::TrueFalse { correct_answer: true } => Some(TRUE_ANSWER),
            QuestionKind::TrueFalse { correct_answer: false } => Some(FALSE_ANSWER),
            QuestionKind::ShortAnswer | QuestionKind::Essay => None,
        }
    }

    /// Options presented to the learner.
    pub fn options(&self) -> Vec<String> {
        match self {
            QuestionKind::MultipleChoice { options, .. } => options.clone(),
            QuestionKind::TrueFalse { .. } => {
                vec![TRUE_ANSWER.to_string(), FALSE_ANSWER.to_string()]
            }
            QuestionKind::ShortAnswer | QuestionKind::Essay => Vec::new(),
        }
    }
}

/// A question as supplied by the exam catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: i64,

    /// Display order within the exam, ascending.
    pub position: i32,

    /// The text content of the question.
    pub content: String,

    /// Points awarded for a fully correct answer. Always positive.
    pub points: f64,

    #[serde(flatten)]
    pub kind: QuestionKind,
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        self.kind.question_type()
    }

    pub fn is_auto_gradable(&self) -> bool {
        self.question_type().is_auto_gradable()
    }
}

/// Exam metadata plus its ordered questions. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,

    /// `None` means untimed.
    pub duration_minutes: Option<i32>,

    pub max_score: f64,
    pub published: bool,

    /// Optional availability window for starting the exam.
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,

    pub questions: Vec<Question>,
}

impl Exam {
    pub fn question(&self, question_id: i64) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.duration_minutes.map(|m| i64::from(m.max(0)) * 60)
    }

    /// Whether `now` lies inside the configured start/end window.
    /// Missing bounds are open.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        let after_start = self.starts_at.is_none_or(|start| now >= start);
        let before_end = self.ends_at.is_none_or(|end| now <= end);
        after_start && before_end
    }
}

/// DTO for sending a question to a learner (excludes the correct answer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub position: i32,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub points: f64,
    pub options: Vec<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        PublicQuestion {
            id: q.id,
            position: q.position,
            question_type: q.question_type(),
            content: q.content.clone(),
            points: q.points,
            options: q.kind.options(),
        }
    }
}
