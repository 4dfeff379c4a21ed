use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::router::Valid;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Account id must not be empty."
    ))]
    pub account_id: String,
}

/// Handler to mark an enrollment as the account's active 2FA method.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<StatusCode> {
    state.enrollment.activate(&body.account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
