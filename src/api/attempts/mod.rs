mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/tests/:test_id", get(handlers::get_test))
        .route(
            "/tests/:test_id/attempts",
            get(handlers::list_attempts).post(handlers::start_attempt),
        )
        .route("/tests/:test_id/attempts/:attempt_id", get(handlers::get_attempt_result))
        .route("/attempts/:attempt_id/progress", post(handlers::save_progress))
        .route("/attempts/:attempt_id/submit", post(handlers::submit_attempt))
        .route("/attempts/:attempt_id/grades", post(handlers::finalize_grading))
        .route("/attempts/:attempt_id/answers", get(handlers::attempt_answers))
        .route("/grading/queue", get(handlers::grading_queue))
}

#[cfg(test)]
mod tests;
