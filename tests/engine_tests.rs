// tests/engine_tests.rs

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use exam_engine::{
    config::EngineSettings,
    engine::{
        Collaborators, ExamEngine,
        clock::ManualClock,
        store::{AnswerStore, AttemptStore},
    },
    error::AppError,
    models::{
        answer::{AnswerStatus, AnswerView},
        attempt::{AttemptStatus, ExamAttempt, NewAttempt, SubmissionMark, SubmitReason},
        exam::{Exam, Question, QuestionKind},
        user::Caller,
    },
    store::MemoryStore,
};
use tokio::sync::Notify;

const EXAM_ID: i64 = 1;
const STUDENT: i64 = 42;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn mcq(id: i64, position: i32, correct: &str) -> Question {
    Question {
        id,
        exam_id: EXAM_ID,
        position,
        content: format!("Question {}", id),
        points: 5.0,
        kind: QuestionKind::MultipleChoice {
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: correct.to_string(),
        },
    }
}

fn essay(id: i64, position: i32) -> Question {
    Question {
        id,
        exam_id: EXAM_ID,
        position,
        content: "Explain the water cycle.".to_string(),
        points: 10.0,
        kind: QuestionKind::Essay,
    }
}

/// Two 5-point MCQs (answers B and C) and one 10-point essay, 30 minutes.
fn sample_exam() -> Exam {
    Exam {
        id: EXAM_ID,
        title: "Science midterm".to_string(),
        duration_minutes: Some(30),
        max_score: 20.0,
        published: true,
        starts_at: None,
        ends_at: None,
        questions: vec![mcq(10, 1, "B"), mcq(11, 2, "C"), essay(12, 3)],
    }
}

struct Harness {
    engine: ExamEngine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

async fn harness_with(exam: Exam, settings: EngineSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.insert_exam(exam).await;
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = ExamEngine::new(Collaborators::from_store(store.clone(), clock.clone()), settings);
    Harness {
        engine,
        store,
        clock,
    }
}

async fn harness() -> Harness {
    harness_with(sample_exam(), EngineSettings::default()).await
}

async fn start(h: &Harness) -> i64 {
    h.engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .expect("start failed")
        .attempt
        .id
}

#[tokio::test]
async fn start_twice_returns_same_attempt_and_keeps_answers() {
    // Arrange
    let h = harness().await;
    let first = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap();
    h.engine
        .controller
        .save_answer(first.attempt.id, 10, "B")
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(5));

    // Act
    let second = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap();

    // Assert
    assert_eq!(second.attempt.id, first.attempt.id);
    assert_eq!(second.attempt.started_at, t0());
    assert_eq!(second.remaining_seconds, Some(25 * 60));
    let saved = second.answers.iter().find(|a| a.question_id == 10).unwrap();
    assert_eq!(saved.answer_value.as_deref(), Some("B"));
    // One row per question exists from the start
    assert_eq!(second.answers.len(), 3);
}

#[tokio::test]
async fn answer_rows_are_stamped_with_the_server_clock() {
    let h = harness().await;
    h.clock.advance(Duration::minutes(2));

    let started = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap();

    assert_eq!(started.answers.len(), 3);
    assert!(
        started
            .answers
            .iter()
            .all(|a| a.updated_at == t0() + Duration::minutes(2))
    );
}

#[tokio::test]
async fn remaining_time_follows_server_clock_and_hits_zero_at_deadline() {
    let h = harness().await;
    let attempt_id = start(&h).await;

    h.clock.advance(Duration::seconds(600));
    let status = h.engine.controller.time_status(attempt_id).await.unwrap();
    assert_eq!(status.remaining_seconds, Some(1200));
    assert_eq!(status.elapsed_seconds, 600);
    assert_eq!(status.attempt.status, AttemptStatus::InProgress);

    h.clock.set(t0() + Duration::seconds(30 * 60 - 1));
    let status = h.engine.controller.time_status(attempt_id).await.unwrap();
    assert_eq!(status.remaining_seconds, Some(1));

    // Exactly at started_at + duration the attempt closes on access.
    h.clock.set(t0() + Duration::seconds(30 * 60));
    let status = h.engine.controller.time_status(attempt_id).await.unwrap();
    assert_eq!(status.attempt.status, AttemptStatus::Submitted);
    assert_eq!(status.attempt.submit_reason, Some(SubmitReason::Timeout));
    assert_eq!(status.attempt.time_spent_seconds, 30 * 60);
    assert_eq!(status.remaining_seconds, None);
}

#[tokio::test]
async fn writes_after_deadline_submit_with_timeout_and_are_rejected() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine
        .controller
        .save_answer(attempt_id, 10, "B")
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(45));
    let result = h.engine.controller.save_answer(attempt_id, 11, "C").await;
    assert_eq!(result.unwrap_err(), AppError::AttemptClosed);

    let attempt = AttemptStore::get(&*h.store, attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Submitted);
    assert_eq!(attempt.submit_reason, Some(SubmitReason::Timeout));
    // Time spent is capped at the exam duration.
    assert_eq!(attempt.time_spent_seconds, 30 * 60);

    let late = AnswerStore::get(&*h.store, attempt_id, 11).await.unwrap().unwrap();
    assert_eq!(late.answer_value, None);
}

#[tokio::test]
async fn submit_twice_is_idempotent() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.clock.advance(Duration::minutes(12));

    let first = h
        .engine
        .controller
        .submit(attempt_id, SubmitReason::Manual)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(3));
    let second = h
        .engine
        .controller
        .submit(attempt_id, SubmitReason::Timeout)
        .await
        .unwrap();

    assert_eq!(first.status, AttemptStatus::Submitted);
    assert_eq!(first.submitted_at, Some(t0() + Duration::minutes(12)));
    assert_eq!(second.submitted_at, first.submitted_at);
    assert_eq!(second.total_score, first.total_score);
    assert_eq!(second.submit_reason, Some(SubmitReason::Manual));
    assert_eq!(second.time_spent_seconds, 12 * 60);
}

#[tokio::test]
async fn manual_submit_after_deadline_is_recorded_as_timeout() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.clock.advance(Duration::minutes(40));

    let attempt = h.engine.flow.submit(attempt_id).await.unwrap();

    assert_eq!(attempt.status, AttemptStatus::Submitted);
    assert_eq!(attempt.submit_reason, Some(SubmitReason::Timeout));
    assert_eq!(attempt.submitted_at, Some(t0() + Duration::minutes(40)));
    assert_eq!(attempt.time_spent_seconds, 30 * 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_violations_are_all_counted() {
    let settings = EngineSettings {
        violation_threshold: 100,
        ..EngineSettings::default()
    };
    let h = harness_with(sample_exam(), settings).await;
    let attempt_id = start(&h).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let controller = h.engine.controller.clone();
        handles.push(tokio::spawn(async move {
            controller.report_violation(attempt_id).await
        }));
    }
    let mut counts = Vec::new();
    for handle in handles {
        counts.push(handle.await.unwrap().unwrap());
    }

    counts.sort();
    assert_eq!(counts, (1..=20).collect::<Vec<i64>>());
    let attempt = AttemptStore::get(&*h.store, attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.violation_count, 20);
    assert_eq!(attempt.status, AttemptStatus::InProgress);

    // Events are forwarded in the background.
    let mut events = Vec::new();
    for _ in 0..50 {
        events = h.store.violation_events().await;
        if events.len() == 20 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(events.len(), 20);
}

#[tokio::test]
async fn third_violation_forces_submission() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine
        .controller
        .save_answer(attempt_id, 10, "B")
        .await
        .unwrap();

    let first = h.engine.flow.report_violation(attempt_id).await.unwrap();
    let second = h.engine.flow.report_violation(attempt_id).await.unwrap();
    assert!(first.submitted.is_none());
    assert!(second.submitted.is_none());

    let third = h.engine.flow.report_violation(attempt_id).await.unwrap();
    assert_eq!(third.violation_count, 3);
    assert_eq!(third.threshold, 3);
    let submitted = third.submitted.expect("attempt should be submitted");
    assert_eq!(submitted.status, AttemptStatus::Submitted);
    assert_eq!(submitted.submit_reason, Some(SubmitReason::Forced));

    let result = h.engine.controller.save_answer(attempt_id, 11, "C").await;
    assert_eq!(result.unwrap_err(), AppError::AttemptClosed);
    let result = h.engine.flow.report_violation(attempt_id).await;
    assert_eq!(result.unwrap_err(), AppError::AttemptClosed);
}

#[tokio::test]
async fn objective_answers_are_graded_case_sensitively() {
    let h = harness().await;
    let attempt_id = start(&h).await;

    h.engine
        .controller
        .save_answer(attempt_id, 10, "B")
        .await
        .unwrap();
    h.engine
        .controller
        .save_answer(attempt_id, 11, "c")
        .await
        .unwrap();
    h.engine.flow.submit(attempt_id).await.unwrap();

    let correct = AnswerStore::get(&*h.store, attempt_id, 10).await.unwrap().unwrap();
    assert_eq!(correct.is_correct, Some(true));
    assert_eq!(correct.score, Some(5.0));
    assert_eq!(correct.status, AnswerStatus::Graded);

    let mismatch = AnswerStore::get(&*h.store, attempt_id, 11).await.unwrap().unwrap();
    assert_eq!(mismatch.is_correct, Some(false));
    assert_eq!(mismatch.score, Some(0.0));

    let essay = AnswerStore::get(&*h.store, attempt_id, 12).await.unwrap().unwrap();
    assert_eq!(essay.score, None);
    assert_eq!(essay.status, AnswerStatus::Ungraded);
}

#[tokio::test]
async fn unanswered_objective_question_scores_zero() {
    let h = harness().await;
    let attempt_id = start(&h).await;

    h.engine.flow.submit(attempt_id).await.unwrap();

    let blank = AnswerStore::get(&*h.store, attempt_id, 10).await.unwrap().unwrap();
    assert_eq!(blank.answer_value, None);
    assert_eq!(blank.is_correct, Some(false));
    assert_eq!(blank.score, Some(0.0));
}

#[tokio::test]
async fn finalize_requires_every_question_scored() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine
        .controller
        .save_answer(attempt_id, 10, "B")
        .await
        .unwrap();
    h.engine
        .controller
        .save_answer(attempt_id, 11, "A")
        .await
        .unwrap();
    h.engine
        .controller
        .save_answer(attempt_id, 12, "Evaporation, condensation, precipitation.")
        .await
        .unwrap();
    h.engine.flow.submit(attempt_id).await.unwrap();

    // Act: essay still ungraded
    let result = h.engine.grading.finalize(attempt_id).await;

    // Assert
    assert_eq!(result.unwrap_err(), AppError::IncompleteGrading(vec![12]));
    assert_eq!(h.store.publish_count().await, 0);

    h.engine
        .grading
        .grade_answer(attempt_id, 12, 7.0, Some("Good outline".to_string()))
        .await
        .unwrap();
    let graded = h.engine.grading.finalize(attempt_id).await.unwrap();

    // 5 + 0 + 7
    assert_eq!(graded.status, AttemptStatus::Graded);
    assert_eq!(graded.total_score, Some(12.0));

    let published = h.store.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].total_score, 12.0);
    assert_eq!(published[0].max_score, 20.0);
    let per_question: Vec<(i64, f64)> = published[0]
        .per_question
        .iter()
        .map(|q| (q.question_id, q.score))
        .collect();
    assert_eq!(per_question, vec![(10, 5.0), (11, 0.0), (12, 7.0)]);
}

#[tokio::test]
async fn finalize_twice_publishes_once() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine.flow.submit(attempt_id).await.unwrap();
    h.engine
        .grading
        .grade_answer(attempt_id, 12, 0.0, None)
        .await
        .unwrap();

    let first = h.engine.grading.finalize(attempt_id).await.unwrap();
    let second = h.engine.grading.finalize(attempt_id).await.unwrap();

    assert_eq!(first.total_score, Some(0.0));
    assert_eq!(second, first);
    assert_eq!(h.store.publish_count().await, 1);
}

#[tokio::test]
async fn score_above_points_is_rejected_without_changes() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine
        .controller
        .save_answer(attempt_id, 12, "Some essay")
        .await
        .unwrap();
    h.engine.flow.submit(attempt_id).await.unwrap();
    let before = AnswerStore::get(&*h.store, attempt_id, 12).await.unwrap().unwrap();

    let result = h.engine.grading.grade_answer(attempt_id, 12, 11.0, None).await;
    assert_eq!(result.unwrap_err(), AppError::ScoreOutOfRange { max: 10.0 });

    let result = h.engine.grading.grade_answer(attempt_id, 12, -1.0, None).await;
    assert_eq!(result.unwrap_err(), AppError::ScoreOutOfRange { max: 10.0 });

    let after = AnswerStore::get(&*h.store, attempt_id, 12).await.unwrap().unwrap();
    assert_eq!(after, before);
    let attempt = AttemptStore::get(&*h.store, attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Submitted);
}

#[tokio::test]
async fn grading_a_finalized_attempt_fails() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine.flow.submit(attempt_id).await.unwrap();
    h.engine
        .grading
        .grade_answer(attempt_id, 12, 4.0, None)
        .await
        .unwrap();
    h.engine.grading.finalize(attempt_id).await.unwrap();

    let result = h.engine.grading.grade_answer(attempt_id, 12, 9.0, None).await;

    assert_eq!(result.unwrap_err(), AppError::AlreadyFinalized);
    let answer = AnswerStore::get(&*h.store, attempt_id, 12).await.unwrap().unwrap();
    assert_eq!(answer.score, Some(4.0));
}

#[tokio::test]
async fn grading_rules_by_state_and_question_type() {
    let h = harness().await;
    let attempt_id = start(&h).await;

    let result = h.engine.grading.grade_answer(attempt_id, 12, 5.0, None).await;
    assert_eq!(result.unwrap_err(), AppError::NotSubmitted);
    let result = h.engine.grading.finalize(attempt_id).await;
    assert_eq!(result.unwrap_err(), AppError::NotSubmitted);

    h.engine.flow.submit(attempt_id).await.unwrap();

    let result = h.engine.grading.grade_answer(attempt_id, 10, 5.0, None).await;
    assert_eq!(result.unwrap_err(), AppError::NotGradable(10));
    let result = h.engine.grading.grade_answer(attempt_id, 99, 5.0, None).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn grader_feedback_is_sanitized() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine.flow.submit(attempt_id).await.unwrap();

    let answer = h
        .engine
        .grading
        .grade_answer(
            attempt_id,
            12,
            6.0,
            Some("<b>Nice</b><script>alert(1)</script>".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(answer.feedback.as_deref(), Some("<b>Nice</b>"));
    assert_eq!(answer.status, AnswerStatus::Graded);
}

#[tokio::test]
async fn failed_publish_changes_nothing_and_retry_publishes_current_scores() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine
        .controller
        .save_answer(attempt_id, 10, "B")
        .await
        .unwrap();
    h.engine.flow.submit(attempt_id).await.unwrap();
    h.engine
        .grading
        .grade_answer(attempt_id, 12, 7.0, None)
        .await
        .unwrap();
    h.store.fail_next_publish().await;

    let result = h.engine.grading.finalize(attempt_id).await;
    assert!(matches!(result, Err(AppError::InternalServerError(_))));
    let attempt = AttemptStore::get(&*h.store, attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Submitted);
    assert_eq!(attempt.total_score, None);
    assert!(h.store.published().await.is_empty());

    // Still gradable, so the grader can correct the essay before retrying.
    h.engine
        .grading
        .grade_answer(attempt_id, 12, 9.0, None)
        .await
        .unwrap();
    let graded = h.engine.grading.finalize(attempt_id).await.unwrap();

    assert_eq!(graded.status, AttemptStatus::Graded);
    assert_eq!(graded.total_score, Some(14.0));
    let published = h.store.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(Some(published[0].total_score), graded.total_score);
    let stored = AttemptStore::get(&*h.store, attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.total_score, Some(published[0].total_score));
}

#[tokio::test]
async fn unpublished_exam_is_only_open_to_graders() {
    let mut exam = sample_exam();
    exam.published = false;
    let h = harness_with(exam, EngineSettings::default()).await;

    let result = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await;
    assert_eq!(result.unwrap_err(), AppError::ExamNotPublished);

    let preview = h
        .engine
        .controller
        .start(EXAM_ID, 7, &Caller::teacher(7))
        .await
        .unwrap();
    assert_eq!(preview.attempt.status, AttemptStatus::InProgress);
}

#[tokio::test]
async fn start_outside_window_is_rejected() {
    let mut exam = sample_exam();
    exam.starts_at = Some(t0() + Duration::hours(1));
    exam.ends_at = Some(t0() + Duration::hours(3));
    let h = harness_with(exam, EngineSettings::default()).await;

    let early = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await;
    assert_eq!(early.unwrap_err(), AppError::WindowClosed);

    h.clock.advance(Duration::hours(2));
    let started = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap();

    // Resuming after the window has closed still returns the attempt.
    h.clock.advance(Duration::hours(2));
    let resumed = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap();
    assert_eq!(resumed.attempt.id, started.attempt.id);
    assert_eq!(resumed.attempt.submit_reason, Some(SubmitReason::Timeout));
}

#[tokio::test]
async fn other_students_cannot_touch_an_attempt() {
    let h = harness().await;
    let attempt_id = start(&h).await;

    let result = h
        .engine
        .controller
        .authorize(attempt_id, &Caller::student(STUDENT + 1))
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let owner = h
        .engine
        .controller
        .authorize(attempt_id, &Caller::student(STUDENT))
        .await
        .unwrap();
    assert_eq!(owner.id, attempt_id);
    assert!(
        h.engine
            .controller
            .authorize(attempt_id, &Caller::teacher(7))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn expire_overdue_submits_abandoned_attempts() {
    let h = harness().await;
    let abandoned = start(&h).await;
    h.clock.advance(Duration::minutes(20));
    let fresh = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT + 1, &Caller::student(STUDENT + 1))
        .await
        .unwrap()
        .attempt
        .id;
    h.clock.advance(Duration::minutes(15));

    let expired = h.engine.controller.expire_overdue(EXAM_ID).await.unwrap();

    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, abandoned);
    assert_eq!(expired[0].submit_reason, Some(SubmitReason::Timeout));
    let still_open = AttemptStore::get(&*h.store, fresh).await.unwrap().unwrap();
    assert_eq!(still_open.status, AttemptStatus::InProgress);

    let queue = h.engine.projection.grading_queue(EXAM_ID).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].attempt_id, abandoned);
    assert_eq!(queue[0].pending_question_ids, vec![12]);
    assert!(!queue[0].ready_to_finalize);
}

#[tokio::test]
async fn tick_submits_only_after_expiry() {
    let h = harness().await;
    let started = h
        .engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap();

    let early = h
        .engine
        .flow
        .tick(&started.session, t0() + Duration::minutes(29))
        .await
        .unwrap();
    assert!(early.is_none());

    h.clock.advance(Duration::minutes(30));
    let closed = h
        .engine
        .flow
        .tick(&started.session, t0() + Duration::minutes(30))
        .await
        .unwrap()
        .expect("expired session should submit");
    assert_eq!(closed.submit_reason, Some(SubmitReason::Timeout));
}

#[tokio::test]
async fn review_reveals_answer_keys_only_when_allowed() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    h.engine
        .controller
        .save_answer(attempt_id, 10, "A")
        .await
        .unwrap();
    h.engine.flow.submit(attempt_id).await.unwrap();

    let learner = Caller::student(STUDENT);
    let review = h.engine.projection.review(attempt_id, &learner).await.unwrap();
    assert_eq!(review.items.len(), 3);
    assert!(review.items.iter().all(|i| i.correct_answer.is_none()));
    assert_eq!(review.items[0].answer_value.as_deref(), Some("A"));
    // Auto-grade results stay hidden until the attempt is graded.
    assert!(review.items.iter().all(|i| i.is_correct.is_none() && i.score.is_none()));
    let json = serde_json::to_value(&review.items[0]).unwrap();
    assert!(json.get("is_correct").is_none());
    assert!(json.get("score").is_none());
    assert!(json.get("status").is_none());

    let grader_view = h
        .engine
        .projection
        .review(attempt_id, &Caller::teacher(7))
        .await
        .unwrap();
    assert_eq!(grader_view.items[0].correct_answer.as_deref(), Some("B"));
    assert_eq!(grader_view.items[0].is_correct, Some(false));
    assert_eq!(grader_view.items[0].status, Some(AnswerStatus::Graded));

    h.engine
        .grading
        .grade_answer(attempt_id, 12, 3.0, None)
        .await
        .unwrap();
    h.engine.grading.finalize(attempt_id).await.unwrap();
    let review = h.engine.projection.review(attempt_id, &learner).await.unwrap();
    assert_eq!(review.items[1].correct_answer.as_deref(), Some("C"));
    assert_eq!(review.items[2].correct_answer, None);
    assert_eq!(review.items[0].is_correct, Some(false));
    assert_eq!(review.items[2].score, Some(3.0));
}

#[tokio::test]
async fn in_progress_answers_hide_auto_grade_from_learners() {
    let h = harness().await;
    let attempt_id = start(&h).await;
    let learner = Caller::student(STUDENT);

    let saved = h
        .engine
        .controller
        .save_answer(attempt_id, 10, "B")
        .await
        .unwrap();
    let attempt = h
        .engine
        .controller
        .authorize(attempt_id, &learner)
        .await
        .unwrap();

    let view = AnswerView::new(&saved, learner.sees_results(&attempt));
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["answer_value"], "B");
    assert!(json.get("score").is_none());
    assert!(json.get("is_correct").is_none());
    assert!(json.get("status").is_none());

    // Graders see the stored result at any time.
    let grader_view = AnswerView::new(&saved, Caller::teacher(7).sees_results(&attempt));
    assert_eq!(grader_view.is_correct, Some(true));
    assert_eq!(grader_view.score, Some(5.0));
}

#[tokio::test]
async fn scores_are_listed_highest_first() {
    let h = harness().await;
    for (student, answer, essay_score) in [(1, "A", 2.0), (2, "B", 9.0), (3, "B", 4.0)] {
        let attempt_id = h
            .engine
            .controller
            .start(EXAM_ID, student, &Caller::student(student))
            .await
            .unwrap()
            .attempt
            .id;
        h.engine
            .controller
            .save_answer(attempt_id, 10, answer)
            .await
            .unwrap();
        h.engine.flow.submit(attempt_id).await.unwrap();
        h.engine
            .grading
            .grade_answer(attempt_id, 12, essay_score, None)
            .await
            .unwrap();
        h.engine.grading.finalize(attempt_id).await.unwrap();
    }

    let scores = h.engine.projection.scores(EXAM_ID).await.unwrap();

    let order: Vec<(i64, f64)> = scores.iter().map(|s| (s.student_id, s.total_score)).collect();
    assert_eq!(order, vec![(2, 14.0), (3, 9.0), (1, 2.0)]);
    assert_eq!(scores[0].percentage, 70.0);
}

/// Attempt store that parks the violation increment reaching `hold_at` until
/// the test releases it.
struct HeldViolations {
    inner: Arc<MemoryStore>,
    hold_at: i64,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl AttemptStore for HeldViolations {
    async fn get(&self, attempt_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        AttemptStore::get(&*self.inner, attempt_id).await
    }

    async fn find(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        self.inner.find(exam_id, student_id).await
    }

    async fn create_or_get(&self, new: NewAttempt) -> Result<(ExamAttempt, bool), AppError> {
        self.inner.create_or_get(new).await
    }

    async fn increment_violations(&self, attempt_id: i64) -> Result<Option<i64>, AppError> {
        let count = self.inner.increment_violations(attempt_id).await?;
        if count == Some(self.hold_at) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(count)
    }

    async fn mark_submitted(
        &self,
        attempt_id: i64,
        mark: SubmissionMark,
    ) -> Result<Option<ExamAttempt>, AppError> {
        self.inner.mark_submitted(attempt_id, mark).await
    }

    async fn list_by_exam(&self, exam_id: i64) -> Result<Vec<ExamAttempt>, AppError> {
        self.inner.list_by_exam(exam_id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_racing_the_deciding_violation_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    store.insert_exam(sample_exam()).await;
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut collaborators =
        Collaborators::from_store(store.clone(), Arc::new(ManualClock::new(t0())));
    collaborators.attempts = Arc::new(HeldViolations {
        inner: store.clone(),
        hold_at: 3,
        entered: entered.clone(),
        release: release.clone(),
    });
    let engine = ExamEngine::new(collaborators, EngineSettings::default());
    let attempt_id = engine
        .controller
        .start(EXAM_ID, STUDENT, &Caller::student(STUDENT))
        .await
        .unwrap()
        .attempt
        .id;
    engine.flow.report_violation(attempt_id).await.unwrap();
    engine.flow.report_violation(attempt_id).await.unwrap();

    // Third violation is counted but parked before the forced submit.
    let flow = engine.flow.clone();
    let violation = tokio::spawn(async move { flow.report_violation(attempt_id).await });
    entered.notified().await;

    let controller = engine.controller.clone();
    let save = tokio::spawn(async move { controller.save_answer(attempt_id, 10, "B").await });
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(!save.is_finished());

    release.notify_one();
    let outcome = violation.await.unwrap().unwrap();
    let submitted = outcome.submitted.expect("threshold should force submission");
    assert_eq!(submitted.submit_reason, Some(SubmitReason::Forced));

    assert_eq!(save.await.unwrap().unwrap_err(), AppError::AttemptClosed);
    let answer = AnswerStore::get(&*store, attempt_id, 10).await.unwrap().unwrap();
    assert_eq!(answer.answer_value, None);
}
