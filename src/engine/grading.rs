// src/engine/grading.rs

use std::{collections::HashMap, sync::Arc};

use crate::{
    engine::{
        Collaborators,
        autosave::AttemptLocks,
        clock::Clock,
        store::{AnswerStore, AttemptStore, Catalog, ScorePublisher},
    },
    error::AppError,
    models::{
        answer::{AutoGrade, StudentAnswer},
        attempt::{AttemptStatus, ExamAttempt},
        exam::{Exam, Question},
        score::{QuestionScore, ScoreRecord},
    },
    utils::html::clean_html,
};

/// The automatic grading rule.
///
/// Objective questions compare the captured answer with the answer key using
/// exact, case-sensitive string equality. A missing or empty answer is wrong.
/// Returns `None` for questions that need a human grader.
pub fn auto_grade(question: &Question, answer_value: Option<&str>) -> Option<AutoGrade> {
    if !question.is_auto_gradable() {
        return None;
    }

    let expected = question.kind.correct_answer()?;
    let is_correct = match answer_value {
        Some(given) if !given.is_empty() => given == expected,
        _ => false,
    };

    Some(AutoGrade {
        is_correct,
        score: if is_correct { question.points } else { 0.0 },
    })
}

/// Manual grading and finalization of submitted attempts.
#[derive(Clone)]
pub struct GradingEngine {
    catalog: Arc<dyn Catalog>,
    attempts: Arc<dyn AttemptStore>,
    answers: Arc<dyn AnswerStore>,
    publisher: Arc<dyn ScorePublisher>,
    clock: Arc<dyn Clock>,
    locks: Arc<AttemptLocks>,
}

impl GradingEngine {
    pub fn new(collaborators: &Collaborators, locks: Arc<AttemptLocks>) -> Self {
        Self {
            catalog: collaborators.catalog.clone(),
            attempts: collaborators.attempts.clone(),
            answers: collaborators.answers.clone(),
            publisher: collaborators.publisher.clone(),
            clock: collaborators.clock.clone(),
            locks,
        }
    }

    /// Records a human score for a short-answer or essay question.
    pub async fn grade_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        score: f64,
        feedback: Option<String>,
    ) -> Result<StudentAnswer, AppError> {
        let _guard = self.locks.acquire(attempt_id).await;

        let attempt = self.load_attempt(attempt_id).await?;
        match attempt.status {
            AttemptStatus::Graded => {
                self.locks.forget(attempt_id).await;
                return Err(AppError::AlreadyFinalized);
            }
            AttemptStatus::InProgress => return Err(AppError::NotSubmitted),
            AttemptStatus::Submitted => {}
        }

        let exam = self.load_exam(attempt.exam_id).await?;
        let question = exam
            .question(question_id)
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

        if question.is_auto_gradable() {
            return Err(AppError::NotGradable(question_id));
        }

        if !score.is_finite() || score < 0.0 || score > question.points {
            return Err(AppError::ScoreOutOfRange {
                max: question.points,
            });
        }

        let feedback = feedback
            .map(|f| clean_html(f.trim()))
            .filter(|f| !f.is_empty());

        let answer = self
            .answers
            .record_manual_grade(attempt_id, question_id, score, feedback, self.clock.now())
            .await?;

        tracing::info!(
            attempt_id,
            question_id,
            score,
            "Manual grade recorded"
        );

        Ok(answer)
    }

    /// Aggregates per-question scores into the official total and publishes it.
    ///
    /// All-or-nothing: any unscored question aborts with `IncompleteGrading`,
    /// and the record is published in the same step that marks the attempt
    /// graded. A graded attempt is returned as-is without republishing.
    pub async fn finalize(&self, attempt_id: i64) -> Result<ExamAttempt, AppError> {
        let _guard = self.locks.acquire(attempt_id).await;

        let attempt = self.load_attempt(attempt_id).await?;
        match attempt.status {
            AttemptStatus::Graded => {
                self.locks.forget(attempt_id).await;
                return Ok(attempt);
            }
            AttemptStatus::InProgress => return Err(AppError::NotSubmitted),
            AttemptStatus::Submitted => {}
        }

        let exam = self.load_exam(attempt.exam_id).await?;
        let answers = self.answers.list(attempt_id).await?;
        let per_question = collect_scores(&exam, &answers)?;
        let total_score: f64 = per_question.iter().map(|q| q.score).sum();

        let record = ScoreRecord {
            attempt_id,
            exam_id: exam.id,
            student_id: attempt.student_id,
            total_score,
            max_score: exam.max_score,
            per_question,
            published_at: self.clock.now(),
        };

        let graded = match self.publisher.publish(&record).await? {
            Some(graded) => graded,
            None => self.load_attempt(attempt_id).await?,
        };

        tracing::info!(
            attempt_id,
            exam_id = exam.id,
            student_id = attempt.student_id,
            total_score,
            "Attempt finalized"
        );

        self.locks.forget(attempt_id).await;
        Ok(graded)
    }

    async fn load_attempt(&self, attempt_id: i64) -> Result<ExamAttempt, AppError> {
        self.attempts
            .get(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))
    }

    async fn load_exam(&self, exam_id: i64) -> Result<Exam, AppError> {
        self.catalog
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
    }
}

/// Pairs every exam question with its answer's score, in exam order.
/// Fails with the ids of questions that have no score yet.
fn collect_scores(exam: &Exam, answers: &[StudentAnswer]) -> Result<Vec<QuestionScore>, AppError> {
    let by_question: HashMap<i64, &StudentAnswer> =
        answers.iter().map(|a| (a.question_id, a)).collect();

    let mut scores = Vec::with_capacity(exam.questions.len());
    let mut missing = Vec::new();

    for question in &exam.questions {
        match by_question.get(&question.id).and_then(|a| a.score) {
            Some(score) => scores.push(QuestionScore {
                question_id: question.id,
                score,
            }),
            None => missing.push(question.id),
        }
    }

    if !missing.is_empty() {
        return Err(AppError::IncompleteGrading(missing));
    }
    Ok(scores)
}
