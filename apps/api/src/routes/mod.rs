pub mod health;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

use crate::errors::AppError;
use crate::generation::handlers as generation;
use crate::history::handlers as history;
use crate::identity::handlers as identity;
use crate::state::AppState;
use crate::tts;

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Identity
        .route("/api/v1/login", post(identity::handle_login))
        // Generation
        .route("/api/v1/stories/generate", post(generation::handle_generate))
        .route("/api/v1/chat", post(generation::handle_chat))
        // Speech
        .route("/api/v1/audio", get(tts::handle_audio))
        // History
        .route(
            "/api/v1/learning/records",
            post(history::handle_record_learning),
        )
        .route(
            "/api/v1/learning/history",
            get(history::handle_learning_history),
        )
        .route("/api/v1/quiz/submit", post(history::handle_submit_quiz))
        .route("/api/v1/quiz/history", get(history::handle_quiz_history))
        // Leaderboards
        .route("/api/v1/leaderboard", get(history::handle_leaderboard))
        .route(
            "/api/v1/leaderboard/learning",
            get(history::handle_learning_leaderboard),
        )
        .fallback(not_found)
        .with_state(state)
}
