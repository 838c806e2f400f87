// src/engine/projection.rs

//! Read-side views built only from attempt and answer state.

use std::{collections::HashMap, sync::Arc};

use crate::{
    engine::{
        Collaborators,
        clock::Clock,
        store::{AnswerStore, AttemptStore, Catalog},
        timing,
    },
    error::AppError,
    models::{
        answer::StudentAnswer,
        attempt::{AttemptStatus, ExamAttempt},
        exam::{Exam, PublicQuestion},
        report::{AttemptReview, GradingQueueEntry, ReviewItem, ScoreListEntry},
        user::Caller,
    },
};

#[derive(Clone)]
pub struct ReportProjection {
    catalog: Arc<dyn Catalog>,
    attempts: Arc<dyn AttemptStore>,
    answers: Arc<dyn AnswerStore>,
    clock: Arc<dyn Clock>,
}

impl ReportProjection {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            catalog: collaborators.catalog.clone(),
            attempts: collaborators.attempts.clone(),
            answers: collaborators.answers.clone(),
            clock: collaborators.clock.clone(),
        }
    }

    /// Per-question view of one attempt. Answer keys and grading results are
    /// shown to graders, and to the learner only once the result is official.
    pub async fn review(&self, attempt_id: i64, viewer: &Caller) -> Result<AttemptReview, AppError> {
        let attempt = self
            .attempts
            .get(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        let exam = self.load_exam(attempt.exam_id).await?;
        let answers = self.answers_by_question(attempt_id).await?;

        let reveal = viewer.sees_results(&attempt);
        let items = exam
            .questions
            .iter()
            .map(|question| {
                let answer = answers.get(&question.id);
                ReviewItem {
                    question: PublicQuestion::from(question),
                    correct_answer: reveal
                        .then(|| question.kind.correct_answer().map(str::to_string))
                        .flatten(),
                    answer_value: answer.and_then(|a| a.answer_value.clone()),
                    score: answer.and_then(|a| a.score).filter(|_| reveal),
                    is_correct: answer.and_then(|a| a.is_correct).filter(|_| reveal),
                    feedback: answer.and_then(|a| a.feedback.clone()).filter(|_| reveal),
                    status: reveal.then(|| answer.map(|a| a.status).unwrap_or_default()),
                }
            })
            .collect();

        let remaining_seconds = if attempt.is_in_progress() {
            timing::remaining_seconds(attempt.started_at, exam.duration_seconds(), self.clock.now())
        } else {
            None
        };

        Ok(AttemptReview {
            attempt,
            exam_title: exam.title,
            max_score: exam.max_score,
            remaining_seconds,
            items,
        })
    }

    /// Submitted attempts of an exam, oldest submission first.
    pub async fn grading_queue(&self, exam_id: i64) -> Result<Vec<GradingQueueEntry>, AppError> {
        let exam = self.load_exam(exam_id).await?;
        let mut submitted: Vec<ExamAttempt> = self
            .attempts
            .list_by_exam(exam_id)
            .await?
            .into_iter()
            .filter(|a| a.status == AttemptStatus::Submitted)
            .collect();
        submitted.sort_by_key(|a| (a.submitted_at, a.id));

        let mut queue = Vec::with_capacity(submitted.len());
        for attempt in submitted {
            let answers = self.answers_by_question(attempt.id).await?;
            let pending_question_ids: Vec<i64> = exam
                .questions
                .iter()
                .filter(|q| answers.get(&q.id).and_then(|a| a.score).is_none())
                .map(|q| q.id)
                .collect();
            let scored_so_far = answers.values().filter_map(|a| a.score).sum();

            queue.push(GradingQueueEntry {
                attempt_id: attempt.id,
                student_id: attempt.student_id,
                submitted_at: attempt.submitted_at,
                submit_reason: attempt.submit_reason,
                violation_count: attempt.violation_count,
                scored_so_far,
                ready_to_finalize: pending_question_ids.is_empty(),
                pending_question_ids,
            });
        }
        Ok(queue)
    }

    /// Official results of an exam, highest score first.
    pub async fn scores(&self, exam_id: i64) -> Result<Vec<ScoreListEntry>, AppError> {
        let exam = self.load_exam(exam_id).await?;
        let mut entries: Vec<ScoreListEntry> = self
            .attempts
            .list_by_exam(exam_id)
            .await?
            .into_iter()
            .filter(|a| a.status == AttemptStatus::Graded)
            .filter_map(|a| {
                let total_score = a.total_score?;
                Some(ScoreListEntry {
                    attempt_id: a.id,
                    student_id: a.student_id,
                    total_score,
                    max_score: exam.max_score,
                    percentage: percentage(total_score, exam.max_score),
                    submitted_at: a.submitted_at,
                    violation_count: a.violation_count,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then(a.attempt_id.cmp(&b.attempt_id))
        });
        Ok(entries)
    }

    async fn answers_by_question(
        &self,
        attempt_id: i64,
    ) -> Result<HashMap<i64, StudentAnswer>, AppError> {
        Ok(self
            .answers
            .list(attempt_id)
            .await?
            .into_iter()
            .map(|a| (a.question_id, a))
            .collect())
    }

    async fn load_exam(&self, exam_id: i64) -> Result<Exam, AppError> {
        self.catalog
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
    }
}

fn percentage(total: f64, max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    (total / max * 10_000.0).round() / 100.0
}
