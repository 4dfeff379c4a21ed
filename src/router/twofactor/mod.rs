//! Two-factor operations.

pub mod activate;
pub mod disable;
pub mod setup;
pub mod verify;

use axum::routing::{delete, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /2fa/setup` creates (or replaces) an enrollment.
        .route("/setup", post(setup::handler))
        // `POST /2fa/verify` checks a one-time or recovery code.
        .route("/verify", post(verify::handler))
        // `POST /2fa/activate` confirms the enrollment.
        .route("/activate", post(activate::handler))
        // `DELETE /2fa` removes it.
        .route("/", delete(disable::handler))
}
