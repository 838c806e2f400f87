// tests/autosave_tests.rs
//
// Debounced autosave, driven by tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use exam_engine::{
    config::EngineSettings,
    engine::{Collaborators, ExamEngine, clock::ManualClock, store::AnswerStore},
    error::AppError,
    models::{
        attempt::AttemptStatus,
        exam::{Exam, Question, QuestionKind},
        user::Caller,
    },
    store::MemoryStore,
};

const DEBOUNCE: Duration = Duration::from_secs(3);

fn exam() -> Exam {
    let question = |id: i64, correct: &str| Question {
        id,
        exam_id: 1,
        position: id as i32,
        content: format!("Pick the right option for #{}", id),
        points: 5.0,
        kind: QuestionKind::MultipleChoice {
            options: vec!["A".into(), "B".into(), "C".into()],
            correct_answer: correct.to_string(),
        },
    };
    Exam {
        id: 1,
        title: "Pop quiz".to_string(),
        duration_minutes: None,
        max_score: 10.0,
        published: true,
        starts_at: None,
        ends_at: None,
        questions: vec![question(1, "B"), question(2, "A")],
    }
}

async fn setup() -> (ExamEngine, Arc<MemoryStore>, i64) {
    let store = Arc::new(MemoryStore::new());
    store.insert_exam(exam()).await;
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap(),
    ));
    let settings = EngineSettings {
        autosave_debounce: DEBOUNCE,
        ..EngineSettings::default()
    };
    let engine = ExamEngine::new(Collaborators::from_store(store.clone(), clock), settings);
    let attempt_id = engine
        .controller
        .start(1, 5, &Caller::student(5))
        .await
        .unwrap()
        .attempt
        .id;
    (engine, store, attempt_id)
}

async fn stored_value(store: &MemoryStore, attempt_id: i64, question_id: i64) -> Option<String> {
    AnswerStore::get(store, attempt_id, question_id)
        .await
        .unwrap()
        .and_then(|a| a.answer_value)
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_last_value() {
    let (engine, store, attempt_id) = setup().await;

    for value in ["A", "C", "B"] {
        engine
            .controller
            .stage_answer(attempt_id, 1, value.to_string())
            .await
            .unwrap();
    }

    assert_eq!(
        engine.controller.pending_answers(attempt_id).await,
        vec![(1, "B".to_string())]
    );
    assert_eq!(stored_value(&store, attempt_id, 1).await, None);

    tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;

    assert_eq!(stored_value(&store, attempt_id, 1).await.as_deref(), Some("B"));
    assert!(engine.controller.pending_answers(attempt_id).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn each_edit_restarts_the_quiet_period() {
    let (engine, store, attempt_id) = setup().await;

    engine
        .controller
        .stage_answer(attempt_id, 1, "A".to_string())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    engine
        .controller
        .stage_answer(attempt_id, 1, "C".to_string())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    // 4s after the first edit, 2s after the second: nothing written yet.
    assert_eq!(stored_value(&store, attempt_id, 1).await, None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(stored_value(&store, attempt_id, 1).await.as_deref(), Some("C"));
}

#[tokio::test(start_paused = true)]
async fn submit_flushes_staged_answers() {
    let (engine, store, attempt_id) = setup().await;

    engine
        .controller
        .stage_answer(attempt_id, 1, "B".to_string())
        .await
        .unwrap();
    engine
        .controller
        .stage_answer(attempt_id, 2, "C".to_string())
        .await
        .unwrap();

    let submitted = engine.flow.submit(attempt_id).await.unwrap();
    assert_eq!(submitted.status, AttemptStatus::Submitted);

    let first = AnswerStore::get(&*store, attempt_id, 1).await.unwrap().unwrap();
    assert_eq!(first.answer_value.as_deref(), Some("B"));
    assert_eq!(first.score, Some(5.0));
    let second = AnswerStore::get(&*store, attempt_id, 2).await.unwrap().unwrap();
    assert_eq!(second.answer_value.as_deref(), Some("C"));
    assert_eq!(second.is_correct, Some(false));
    assert!(engine.controller.pending_answers(attempt_id).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn no_writes_land_after_submission() {
    let (engine, store, attempt_id) = setup().await;

    engine
        .controller
        .stage_answer(attempt_id, 1, "B".to_string())
        .await
        .unwrap();
    engine.flow.submit(attempt_id).await.unwrap();
    let frozen = AnswerStore::list(&*store, attempt_id).await.unwrap();

    let late = engine
        .controller
        .stage_answer(attempt_id, 1, "A".to_string())
        .await;
    assert_eq!(late.unwrap_err(), AppError::AttemptClosed);

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(AnswerStore::list(&*store, attempt_id).await.unwrap(), frozen);
}

#[tokio::test(start_paused = true)]
async fn immediate_save_supersedes_staged_draft() {
    let (engine, store, attempt_id) = setup().await;

    engine
        .controller
        .stage_answer(attempt_id, 1, "A".to_string())
        .await
        .unwrap();
    engine
        .controller
        .save_answer(attempt_id, 1, "B")
        .await
        .unwrap();

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(stored_value(&store, attempt_id, 1).await.as_deref(), Some("B"));
}

#[tokio::test(start_paused = true)]
async fn flush_writes_pending_drafts_now() {
    let (engine, store, attempt_id) = setup().await;

    engine
        .controller
        .stage_answer(attempt_id, 2, "A".to_string())
        .await
        .unwrap();

    let flushed = engine.controller.flush_answers(attempt_id).await.unwrap();

    assert_eq!(flushed, 1);
    assert_eq!(stored_value(&store, attempt_id, 2).await.as_deref(), Some("A"));
}

#[tokio::test(start_paused = true)]
async fn staging_unknown_question_is_rejected() {
    let (engine, _store, attempt_id) = setup().await;

    let result = engine
        .controller
        .stage_answer(attempt_id, 99, "A".to_string())
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}
