// src/store/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    engine::store::{
        AnswerStore, AttemptStore, Catalog, ScorePublisher, ViolationEvent, ViolationSink,
    },
    error::AppError,
    models::{
        answer::{AnswerStatus, AutoGrade, StudentAnswer},
        attempt::{AttemptStatus, ExamAttempt, NewAttempt, SubmissionMark},
        exam::Exam,
        score::ScoreRecord,
    },
};

#[derive(Debug, Default)]
struct Inner {
    exams: HashMap<i64, Exam>,
    attempts: HashMap<i64, ExamAttempt>,
    answers: HashMap<(i64, i64), StudentAnswer>,
    scores: HashMap<i64, ScoreRecord>,
    publish_calls: usize,
    fail_next_publish: bool,
    violations: Vec<ViolationEvent>,
    next_attempt_id: i64,
    next_answer_id: i64,
}

/// Process-local implementation of every collaborator.
/// One mutex guards all maps, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_exam(&self, exam: Exam) {
        self.inner.lock().await.exams.insert(exam.id, exam);
    }

    /// Official records published so far, ordered by attempt id.
    pub async fn published(&self) -> Vec<ScoreRecord> {
        let inner = self.inner.lock().await;
        let mut records: Vec<ScoreRecord> = inner.scores.values().cloned().collect();
        records.sort_by_key(|r| r.attempt_id);
        records
    }

    /// Number of `publish` calls that created a record and graded the attempt.
    pub async fn publish_count(&self) -> usize {
        self.inner.lock().await.publish_calls
    }

    /// Makes the next `publish` fail before it changes anything.
    pub async fn fail_next_publish(&self) {
        self.inner.lock().await.fail_next_publish = true;
    }

    pub async fn violation_events(&self) -> Vec<ViolationEvent> {
        self.inner.lock().await.violations.clone()
    }
}

impl Inner {
    fn answer_entry(&mut self, attempt_id: i64, question_id: i64, at: DateTime<Utc>) -> &mut StudentAnswer {
        let next_id = &mut self.next_answer_id;
        self.answers
            .entry((attempt_id, question_id))
            .or_insert_with(|| {
                *next_id += 1;
                StudentAnswer {
                    id: *next_id,
                    attempt_id,
                    question_id,
                    answer_value: None,
                    score: None,
                    is_correct: None,
                    feedback: None,
                    status: AnswerStatus::Ungraded,
                    updated_at: at,
                }
            })
    }

    fn attempt_mut(&mut self, attempt_id: i64) -> Result<&mut ExamAttempt, AppError> {
        self.attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn get_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        Ok(self.inner.lock().await.exams.get(&exam_id).cloned())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn get(&self, attempt_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        Ok(self.inner.lock().await.attempts.get(&attempt_id).cloned())
    }

    async fn find(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .values()
            .find(|a| a.exam_id == exam_id && a.student_id == student_id)
            .cloned())
    }

    async fn create_or_get(&self, new: NewAttempt) -> Result<(ExamAttempt, bool), AppError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .attempts
            .values()
            .find(|a| a.exam_id == new.exam_id && a.student_id == new.student_id)
        {
            return Ok((existing.clone(), false));
        }

        inner.next_attempt_id += 1;
        let attempt = ExamAttempt {
            id: inner.next_attempt_id,
            exam_id: new.exam_id,
            student_id: new.student_id,
            status: AttemptStatus::InProgress,
            started_at: new.started_at,
            submitted_at: None,
            time_spent_seconds: 0,
            violation_count: 0,
            total_score: None,
            submit_reason: None,
        };
        inner.attempts.insert(attempt.id, attempt.clone());
        Ok((attempt, true))
    }

    async fn increment_violations(&self, attempt_id: i64) -> Result<Option<i64>, AppError> {
        let mut inner = self.inner.lock().await;
        let attempt = inner.attempt_mut(attempt_id)?;
        if attempt.status != AttemptStatus::InProgress {
            return Ok(None);
        }
        attempt.violation_count += 1;
        Ok(Some(attempt.violation_count))
    }

    async fn mark_submitted(
        &self,
        attempt_id: i64,
        mark: SubmissionMark,
    ) -> Result<Option<ExamAttempt>, AppError> {
        let mut inner = self.inner.lock().await;
        let attempt = inner.attempt_mut(attempt_id)?;
        if attempt.status != AttemptStatus::InProgress {
            return Ok(None);
        }
        attempt.status = AttemptStatus::Submitted;
        attempt.submitted_at = Some(mark.submitted_at);
        attempt.time_spent_seconds = attempt.time_spent_seconds.max(mark.time_spent_seconds);
        attempt.submit_reason = Some(mark.reason);
        Ok(Some(attempt.clone()))
    }

    async fn list_by_exam(&self, exam_id: i64) -> Result<Vec<ExamAttempt>, AppError> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<ExamAttempt> = inner
            .attempts
            .values()
            .filter(|a| a.exam_id == exam_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.id);
        Ok(attempts)
    }
}

#[async_trait]
impl AnswerStore for MemoryStore {
    async fn list(&self, attempt_id: i64) -> Result<Vec<StudentAnswer>, AppError> {
        let inner = self.inner.lock().await;
        let mut answers: Vec<StudentAnswer> = inner
            .answers
            .values()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by_key(|a| a.question_id);
        Ok(answers)
    }

    async fn get(
        &self,
        attempt_id: i64,
        question_id: i64,
    ) -> Result<Option<StudentAnswer>, AppError> {
        Ok(self
            .inner
            .lock()
            .await
            .answers
            .get(&(attempt_id, question_id))
            .cloned())
    }

    async fn ensure(
        &self,
        attempt_id: i64,
        question_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        for question_id in question_ids {
            inner.answer_entry(attempt_id, *question_id, at);
        }
        Ok(())
    }

    async fn upsert_value(
        &self,
        attempt_id: i64,
        question_id: i64,
        value: &str,
        grade: Option<AutoGrade>,
        at: DateTime<Utc>,
    ) -> Result<StudentAnswer, AppError> {
        let mut inner = self.inner.lock().await;
        let answer = inner.answer_entry(attempt_id, question_id, at);
        answer.answer_value = Some(value.to_string());
        answer.is_correct = grade.map(|g| g.is_correct);
        answer.score = grade.map(|g| g.score);
        answer.status = AnswerStatus::Ungraded;
        answer.updated_at = at;
        Ok(answer.clone())
    }

    async fn record_auto_grade(
        &self,
        attempt_id: i64,
        question_id: i64,
        grade: AutoGrade,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let answer = inner.answer_entry(attempt_id, question_id, at);
        answer.is_correct = Some(grade.is_correct);
        answer.score = Some(grade.score);
        answer.status = AnswerStatus::Graded;
        answer.updated_at = at;
        Ok(())
    }

    async fn record_manual_grade(
        &self,
        attempt_id: i64,
        question_id: i64,
        score: f64,
        feedback: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StudentAnswer, AppError> {
        let mut inner = self.inner.lock().await;
        let answer = inner.answer_entry(attempt_id, question_id, at);
        answer.score = Some(score);
        answer.feedback = feedback;
        answer.status = AnswerStatus::Graded;
        answer.updated_at = at;
        Ok(answer.clone())
    }
}

#[async_trait]
impl ScorePublisher for MemoryStore {
    async fn publish(&self, record: &ScoreRecord) -> Result<Option<ExamAttempt>, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_next_publish {
            inner.fail_next_publish = false;
            return Err(AppError::InternalServerError(
                "score service unavailable".to_string(),
            ));
        }

        let attempt = inner.attempt_mut(record.attempt_id)?;
        if attempt.status != AttemptStatus::Submitted {
            return Ok(None);
        }
        attempt.status = AttemptStatus::Graded;
        attempt.total_score = Some(record.total_score);
        let graded = attempt.clone();

        inner.scores.insert(record.attempt_id, record.clone());
        inner.publish_calls += 1;
        Ok(Some(graded))
    }
}

#[async_trait]
impl ViolationSink for MemoryStore {
    async fn report(&self, event: &ViolationEvent) -> Result<(), AppError> {
        self.inner.lock().await.violations.push(event.clone());
        Ok(())
    }
}
