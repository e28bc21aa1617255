pub mod cli;
pub mod config;
pub mod dto;
pub mod error;
pub mod index;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use axum::{
    routing::{get, post},
    Router,
};

use crate::models::session::QuestionBank;
use crate::services::quiz_service::QuizService;

#[derive(Clone)]
pub struct AppState {
    pub quiz_service: QuizService,
}

impl AppState {
    pub fn new(bank: QuestionBank) -> Self {
        Self {
            quiz_service: QuizService::new(bank),
        }
    }
}

/// Quiz API routes with state applied; layers are added by the caller.
pub fn router(state: AppState) -> Router {
    let quiz_api = Router::new()
        .route("/api/questions", get(routes::quiz::list_questions))
        .route("/api/sessions", post(routes::quiz::create_session))
        .route(
            "/api/sessions/:id",
            get(routes::quiz::get_session).delete(routes::quiz::delete_session),
        )
        .route(
            "/api/sessions/:id/questions",
            get(routes::quiz::session_questions),
        )
        .route("/api/sessions/:id/begin", post(routes::quiz::begin))
        .route("/api/sessions/:id/next", post(routes::quiz::next))
        .route("/api/sessions/:id/previous", post(routes::quiz::previous))
        .route("/api/sessions/:id/review", post(routes::quiz::review))
        .route(
            "/api/sessions/:id/jump/:question_id",
            post(routes::quiz::jump),
        )
        .route("/api/sessions/:id/answer", post(routes::quiz::answer));

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(quiz_api)
        .with_state(state)
}
