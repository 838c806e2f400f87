// src/engine/mod.rs

//! The exam attempt engine: attempt state machine, autosave, proctoring
//! policy, grading and read-side projections.

pub mod autosave;
pub mod clock;
pub mod controller;
pub mod grading;
pub mod projection;
pub mod session;
pub mod store;
pub mod timing;

use std::sync::Arc;

use crate::config::EngineSettings;

use self::{
    autosave::AttemptLocks,
    clock::Clock,
    controller::AttemptController,
    grading::GradingEngine,
    projection::ReportProjection,
    session::LearnerFlow,
    store::{AnswerStore, AttemptStore, Catalog, ScorePublisher, ViolationSink},
};

/// The external services the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub attempts: Arc<dyn AttemptStore>,
    pub answers: Arc<dyn AnswerStore>,
    pub publisher: Arc<dyn ScorePublisher>,
    pub violations: Arc<dyn ViolationSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Wires every collaborator to one backing store.
    pub fn from_store<S>(store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: Catalog + AttemptStore + AnswerStore + ScorePublisher + ViolationSink + 'static,
    {
        Self {
            catalog: store.clone(),
            attempts: store.clone(),
            answers: store.clone(),
            publisher: store.clone(),
            violations: store,
            clock,
        }
    }
}

/// All engine components, sharing one set of per-attempt locks.
#[derive(Clone)]
pub struct ExamEngine {
    pub controller: AttemptController,
    pub grading: GradingEngine,
    pub projection: ReportProjection,
    pub flow: LearnerFlow,
}

impl ExamEngine {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let locks = Arc::new(AttemptLocks::default());
        let controller = AttemptController::new(&collaborators, locks.clone(), settings);
        let grading = GradingEngine::new(&collaborators, locks);
        let projection = ReportProjection::new(&collaborators);
        let flow = LearnerFlow::new(controller.clone(), settings.violation_threshold);

        Self {
            controller,
            grading,
            projection,
            flow,
        }
    }
}
