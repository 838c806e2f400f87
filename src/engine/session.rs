// src/engine/session.rs

use crate::{
    engine::controller::AttemptController,
    error::AppError,
    models::{
        attempt::{AttemptSession, ExamAttempt, SubmitReason},
        report::ViolationOutcome,
    },
};

/// The learner-facing composition of the controller's primitives.
///
/// Enforces the proctoring policy: reaching the violation threshold submits
/// the attempt with `reason=forced`, with no grace period.
#[derive(Clone)]
pub struct LearnerFlow {
    controller: AttemptController,
    violation_threshold: i64,
}

impl LearnerFlow {
    pub fn new(controller: AttemptController, violation_threshold: i64) -> Self {
        Self {
            controller,
            violation_threshold: violation_threshold.max(1),
        }
    }

    pub fn violation_threshold(&self) -> i64 {
        self.violation_threshold
    }

    pub async fn report_violation(&self, attempt_id: i64) -> Result<ViolationOutcome, AppError> {
        let (violation_count, submitted) = self
            .controller
            .record_violation(attempt_id, Some(self.violation_threshold))
            .await?;

        Ok(ViolationOutcome {
            violation_count,
            threshold: self.violation_threshold,
            submitted,
        })
    }

    /// Countdown tick. Submits with `timeout` once the session has expired.
    pub async fn tick(
        &self,
        session: &AttemptSession,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<ExamAttempt>, AppError> {
        if session.is_expired(now) {
            let attempt = self
                .controller
                .submit(session.attempt_id, SubmitReason::Timeout)
                .await?;
            return Ok(Some(attempt));
        }
        Ok(None)
    }

    /// A learner clicking "submit". Timeouts and forced submissions are
    /// decided by the server, never taken from the client.
    pub async fn submit(&self, attempt_id: i64) -> Result<ExamAttempt, AppError> {
        self.controller.submit(attempt_id, SubmitReason::Manual).await
    }
}
