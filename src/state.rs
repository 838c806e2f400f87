use crate::config::Config;
use crate::engine::ExamEngine;
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub engine: ExamEngine,
    pub config: Config,
}

impl FromRef<AppState> for ExamEngine {
    fn from_ref(state: &AppState) -> Self {
        state.engine.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
