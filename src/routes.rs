// src/routes.rs

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempt, grading, report},
    state::AppState,
    utils::jwt::{auth_middleware, grader_middleware},
};

/// Assembles the main application router.
///
/// * Learner routes (attempt lifecycle, review) require a valid token.
/// * Grading routes additionally require the teacher or admin role.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let exam_routes = Router::new()
        .route("/{exam_id}/attempts", post(attempt::start_attempt))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let attempt_routes = Router::new()
        .route("/{id}", get(report::review_attempt))
        .route("/{id}/time", get(attempt::time_status))
        .route("/{id}/answers/{question_id}", put(attempt::save_answer))
        .route(
            "/{id}/answers/{question_id}/draft",
            post(attempt::stage_answer),
        )
        .route("/{id}/violations", post(attempt::report_violation))
        .route("/{id}/submit", post(attempt::submit_attempt))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let grading_routes = Router::new()
        .route("/exams/{exam_id}/queue", get(report::grading_queue))
        .route("/exams/{exam_id}/scores", get(report::list_scores))
        .route(
            "/attempts/{id}/answers/{question_id}",
            put(grading::grade_answer),
        )
        .route("/attempts/{id}/finalize", post(grading::finalize_attempt))
        // Auth first, then the grader check
        .layer(middleware::from_fn(grader_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/exams", exam_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/grading", grading_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
