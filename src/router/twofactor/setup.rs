use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
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

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Base32 shared secret, shown exactly once.
    pub secret: String,
    /// Single-use recovery codes, shown exactly once.
    pub backup_codes: Vec<String>,
    /// `otpauth://` URI for authenticator apps.
    pub provisioning_uri: String,
}

/// Handler to create (or replace) an enrollment.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Response>)> {
    let setup = state.enrollment.setup(&body.account_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(Response {
            secret: setup.secret,
            backup_codes: setup.backup_codes,
            provisioning_uri: setup.provisioning_uri,
        }),
    ))
}
