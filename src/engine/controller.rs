// src/engine/controller.rs

use std::sync::Arc;

use crate::{
    config::EngineSettings,
    engine::{
        autosave::{AttemptLocks, AutosaveBuffer},
        Collaborators,
        clock::Clock,
        grading::auto_grade,
        store::{AnswerStore, AttemptStore, Catalog, ViolationEvent, ViolationSink},
        timing,
    },
    error::AppError,
    models::{
        answer::StudentAnswer,
        attempt::{AttemptSession, ExamAttempt, NewAttempt, SubmissionMark, SubmitReason},
        exam::Exam,
        report::TimeStatus,
        user::Caller,
    },
};

/// Result of `start`: the attempt plus everything the client needs to render it.
#[derive(Debug, Clone)]
pub struct StartedAttempt {
    pub session: AttemptSession,
    pub attempt: ExamAttempt,
    pub exam: Exam,
    pub answers: Vec<StudentAnswer>,
    pub remaining_seconds: Option<i64>,
}

/// Drives the attempt state machine: `in_progress -> submitted`.
///
/// Every mutation of an attempt runs under that attempt's lock, so timer
/// flushes, violation reports and submissions never interleave.
#[derive(Clone)]
pub struct AttemptController {
    catalog: Arc<dyn Catalog>,
    attempts: Arc<dyn AttemptStore>,
    answers: Arc<dyn AnswerStore>,
    violations: Arc<dyn ViolationSink>,
    clock: Arc<dyn Clock>,
    autosave: Arc<AutosaveBuffer>,
    locks: Arc<AttemptLocks>,
    settings: EngineSettings,
}

impl AttemptController {
    pub fn new(
        collaborators: &Collaborators,
        locks: Arc<AttemptLocks>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            catalog: collaborators.catalog.clone(),
            attempts: collaborators.attempts.clone(),
            answers: collaborators.answers.clone(),
            violations: collaborators.violations.clone(),
            clock: collaborators.clock.clone(),
            autosave: Arc::new(AutosaveBuffer::new()),
            locks,
            settings,
        }
    }

    /// Starts a new attempt, or resumes/returns the existing one for
    /// (exam, student). Resuming never resets timing or answers.
    pub async fn start(
        &self,
        exam_id: i64,
        student_id: i64,
        caller: &Caller,
    ) -> Result<StartedAttempt, AppError> {
        let exam = self.load_exam(exam_id).await?;

        let attempt = match self.attempts.find(exam_id, student_id).await? {
            Some(existing) => {
                let _guard = self.locks.acquire(existing.id).await;
                let attempt = self.close_if_expired(existing, &exam).await?;
                tracing::info!(
                    attempt_id = attempt.id,
                    status = %attempt.status,
                    "Attempt resumed"
                );
                attempt
            }
            None => {
                let now = self.clock.now();
                if !exam.published && !caller.is_grader() {
                    return Err(AppError::ExamNotPublished);
                }
                if !exam.window_contains(now) {
                    return Err(AppError::WindowClosed);
                }

                let (attempt, created) = self
                    .attempts
                    .create_or_get(NewAttempt {
                        exam_id,
                        student_id,
                        started_at: now,
                    })
                    .await?;

                let question_ids: Vec<i64> = exam.questions.iter().map(|q| q.id).collect();
                self.answers.ensure(attempt.id, &question_ids, now).await?;

                if created {
                    tracing::info!(
                        attempt_id = attempt.id,
                        exam_id,
                        student_id,
                        "Attempt started"
                    );
                }
                attempt
            }
        };

        let answers = self.answers.list(attempt.id).await?;
        let session = AttemptSession::new(&attempt, exam.duration_seconds());
        let remaining_seconds = if attempt.is_in_progress() {
            session.remaining_seconds(self.clock.now())
        } else {
            None
        };

        Ok(StartedAttempt {
            session,
            attempt,
            exam,
            answers,
            remaining_seconds,
        })
    }

    /// Writes an answer immediately, superseding any staged draft for it.
    pub async fn save_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        value: &str,
    ) -> Result<StudentAnswer, AppError> {
        let _guard = self.locks.acquire(attempt_id).await;
        self.autosave.discard(attempt_id, question_id).await;
        self.save_answer_locked(attempt_id, question_id, value).await
    }

    /// Stages an answer for a debounced write. The write happens after
    /// `autosave_debounce` of quiet time on this question, or at submission.
    pub async fn stage_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        value: String,
    ) -> Result<(), AppError> {
        {
            let _guard = self.locks.acquire(attempt_id).await;
            let (_, exam) = self.load_open(attempt_id).await?;
            if exam.question(question_id).is_none() {
                return Err(AppError::NotFound("Question not found".to_string()));
            }
        }

        let delay = self.settings.autosave_debounce;
        let controller = self.clone();
        self.autosave
            .stage(attempt_id, question_id, value, move |generation| {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    controller
                        .flush_staged(attempt_id, question_id, generation)
                        .await;
                })
            })
            .await;

        Ok(())
    }

    /// Writes every staged answer of the attempt now.
    pub async fn flush_answers(&self, attempt_id: i64) -> Result<usize, AppError> {
        let _guard = self.locks.acquire(attempt_id).await;
        let (attempt, exam) = self.load_open(attempt_id).await?;
        self.flush_locked(&attempt, &exam).await
    }

    /// Counts one proctoring violation. Concurrent reports are all counted.
    ///
    /// This does not submit; the learner flow decides what the count means.
    pub async fn report_violation(&self, attempt_id: i64) -> Result<i64, AppError> {
        let (count, _) = self.record_violation(attempt_id, None).await?;
        Ok(count)
    }

    /// Counts one violation and, once the count reaches `threshold`, submits
    /// with `forced` before the attempt's lock is released. No write can land
    /// between the deciding violation and the submission.
    pub async fn record_violation(
        &self,
        attempt_id: i64,
        threshold: Option<i64>,
    ) -> Result<(i64, Option<ExamAttempt>), AppError> {
        let _guard = self.locks.acquire(attempt_id).await;
        let (attempt, exam) = self.load_open(attempt_id).await?;

        let count = self
            .attempts
            .increment_violations(attempt_id)
            .await?
            .ok_or(AppError::AttemptClosed)?;

        tracing::warn!(attempt_id, count, "Proctoring violation");

        let event = ViolationEvent {
            attempt_id,
            student_id: attempt.student_id,
            violation_count: count,
            occurred_at: self.clock.now(),
        };
        let sink = self.violations.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.report(&event).await {
                tracing::warn!("Failed to forward violation event: {}", e);
            }
        });

        let Some(threshold) = threshold.filter(|t| count >= *t) else {
            return Ok((count, None));
        };

        tracing::warn!(
            attempt_id,
            count,
            threshold,
            "Violation threshold reached, forcing submission"
        );
        let submitted = self
            .submit_locked(attempt, &exam, SubmitReason::Forced)
            .await?;
        Ok((count, Some(submitted)))
    }

    /// Closes the attempt. Idempotent: a submitted or graded attempt is
    /// returned unchanged, so racing timeout, forced and manual submits agree.
    pub async fn submit(
        &self,
        attempt_id: i64,
        reason: SubmitReason,
    ) -> Result<ExamAttempt, AppError> {
        let _guard = self.locks.acquire(attempt_id).await;
        let attempt = self.load_attempt(attempt_id).await?;
        if !attempt.is_in_progress() {
            return Ok(attempt);
        }
        let exam = self.load_exam(attempt.exam_id).await?;

        // Past the deadline the server's reason wins over the caller's.
        let attempt = self.close_if_expired(attempt, &exam).await?;
        if !attempt.is_in_progress() {
            return Ok(attempt);
        }
        self.submit_locked(attempt, &exam, reason).await
    }

    /// Server-side countdown. Submits with `timeout` once it reaches zero.
    pub async fn time_status(&self, attempt_id: i64) -> Result<TimeStatus, AppError> {
        let _guard = self.locks.acquire(attempt_id).await;
        let attempt = self.load_attempt(attempt_id).await?;
        let exam = self.load_exam(attempt.exam_id).await?;
        let attempt = self.close_if_expired(attempt, &exam).await?;

        let (elapsed_seconds, remaining_seconds) = if attempt.is_in_progress() {
            let now = self.clock.now();
            (
                timing::elapsed_seconds(attempt.started_at, now),
                timing::remaining_seconds(attempt.started_at, exam.duration_seconds(), now),
            )
        } else {
            (attempt.time_spent_seconds, None)
        };

        Ok(TimeStatus {
            attempt,
            elapsed_seconds,
            remaining_seconds,
        })
    }

    /// Submits every in-progress attempt of the exam whose time has run out.
    pub async fn expire_overdue(&self, exam_id: i64) -> Result<Vec<ExamAttempt>, AppError> {
        let exam = self.load_exam(exam_id).await?;
        let Some(duration) = exam.duration_seconds() else {
            return Ok(Vec::new());
        };

        let mut expired = Vec::new();
        for attempt in self.attempts.list_by_exam(exam_id).await? {
            if attempt.is_in_progress()
                && timing::is_expired(attempt.started_at, Some(duration), self.clock.now())
            {
                expired.push(self.submit(attempt.id, SubmitReason::Timeout).await?);
            }
        }
        Ok(expired)
    }

    /// Loads an attempt the caller may act on as a learner.
    /// Graders may access any attempt.
    pub async fn authorize(&self, attempt_id: i64, caller: &Caller) -> Result<ExamAttempt, AppError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if !caller.is_grader() && attempt.student_id != caller.user_id {
            return Err(AppError::Forbidden(
                "Attempt belongs to another student".to_string(),
            ));
        }
        Ok(attempt)
    }

    pub async fn pending_answers(&self, attempt_id: i64) -> Vec<(i64, String)> {
        self.autosave.pending(attempt_id).await
    }

    async fn flush_staged(&self, attempt_id: i64, question_id: i64, generation: u64) {
        let _guard = self.locks.acquire(attempt_id).await;
        let Some(value) = self.autosave.take(attempt_id, question_id, generation).await else {
            return;
        };
        if let Err(e) = self.save_answer_locked(attempt_id, question_id, &value).await {
            tracing::warn!(attempt_id, question_id, "Autosave dropped: {}", e);
        }
    }

    async fn save_answer_locked(
        &self,
        attempt_id: i64,
        question_id: i64,
        value: &str,
    ) -> Result<StudentAnswer, AppError> {
        let (_, exam) = self.load_open(attempt_id).await?;
        let question = exam
            .question(question_id)
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

        let grade = auto_grade(question, Some(value));
        self.answers
            .upsert_value(attempt_id, question_id, value, grade, self.clock.now())
            .await
    }

    /// Writes drained drafts while the attempt is still in progress.
    async fn flush_locked(&self, attempt: &ExamAttempt, exam: &Exam) -> Result<usize, AppError> {
        let drained = self.autosave.drain(attempt.id).await;
        let count = drained.len();
        for (question_id, value) in drained {
            let Some(question) = exam.question(question_id) else {
                continue;
            };
            let grade = auto_grade(question, Some(&value));
            self.answers
                .upsert_value(attempt.id, question_id, &value, grade, self.clock.now())
                .await?;
        }
        Ok(count)
    }

    async fn submit_locked(
        &self,
        attempt: ExamAttempt,
        exam: &Exam,
        reason: SubmitReason,
    ) -> Result<ExamAttempt, AppError> {
        let flushed = self.flush_locked(&attempt, exam).await?;

        // Complete automatic grading before the status flips so a submitted
        // attempt never has an unscored objective answer.
        let question_ids: Vec<i64> = exam.questions.iter().map(|q| q.id).collect();
        let graded_at = self.clock.now();
        self.answers.ensure(attempt.id, &question_ids, graded_at).await?;
        for answer in self.answers.list(attempt.id).await? {
            let Some(question) = exam.question(answer.question_id) else {
                continue;
            };
            if let Some(grade) = auto_grade(question, answer.answer_value.as_deref()) {
                self.answers
                    .record_auto_grade(attempt.id, answer.question_id, grade, graded_at)
                    .await?;
            }
        }

        let submitted_at = self.clock.now();
        let mark = SubmissionMark {
            submitted_at,
            time_spent_seconds: timing::time_spent_seconds(
                attempt.started_at,
                submitted_at,
                exam.duration_seconds(),
            ),
            reason,
        };

        let submitted = match self.attempts.mark_submitted(attempt.id, mark).await? {
            Some(submitted) => {
                tracing::info!(
                    attempt_id = submitted.id,
                    reason = %reason,
                    time_spent = submitted.time_spent_seconds,
                    flushed,
                    "Attempt submitted"
                );
                submitted
            }
            None => self.load_attempt(attempt.id).await?,
        };

        self.locks.forget(attempt.id).await;
        Ok(submitted)
    }

    /// Submits with `timeout` if the attempt's time has run out.
    async fn close_if_expired(
        &self,
        attempt: ExamAttempt,
        exam: &Exam,
    ) -> Result<ExamAttempt, AppError> {
        if attempt.is_in_progress()
            && timing::is_expired(attempt.started_at, exam.duration_seconds(), self.clock.now())
        {
            return self.submit_locked(attempt, exam, SubmitReason::Timeout).await;
        }
        Ok(attempt)
    }

    /// Loads an attempt that must still accept learner writes.
    /// An overdue attempt is submitted first and reported as closed.
    async fn load_open(&self, attempt_id: i64) -> Result<(ExamAttempt, Exam), AppError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(AppError::AttemptClosed);
        }
        let exam = self.load_exam(attempt.exam_id).await?;
        let attempt = self.close_if_expired(attempt, &exam).await?;
        if !attempt.is_in_progress() {
            return Err(AppError::AttemptClosed);
        }
        Ok((attempt, exam))
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
