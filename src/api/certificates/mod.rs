mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

/// Lookups are public so third parties can verify a certificate they were shown.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/validate", get(handlers::validate_by_email))
        .route("/:certificate_id", get(handlers::get_certificate))
        .route("/:certificate_id/revoke", post(handlers::revoke_certificate))
        .route("/:certificate_id/reinstate", post(handlers::reinstate_certificate))
}

#[cfg(test)]
mod tests;
