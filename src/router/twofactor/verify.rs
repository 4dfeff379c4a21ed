use axum::extract::State;
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
    /// One-time password (6 digits) or recovery code (8 characters).
    #[validate(length(
        min = 1,
        max = 16,
        message = "Code must be a one-time password or a recovery code."
    ))]
    pub code: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub valid: bool,
    pub used_backup_code: bool,
    /// Matched window offset in steps, when a one-time password matched.
    pub drift: Option<i64>,
}

/// Handler to verify a submitted code.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let outcome =
        state.enrollment.verify(&body.account_id, &body.code).await?;

    Ok(Json(Response {
        valid: outcome.valid,
        used_backup_code: outcome.used_backup_code,
        drift: outcome.drift,
    }))
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn read(
        response: axum::http::Response<axum::body::Body>,
    ) -> Response {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_verify_without_enrollment() {
        let app = app(router::state());

        let response = make_request(
            app,
            Method::POST,
            "/2fa/verify",
            json!({ "account_id": "ghost", "code": "123456" }).to_string(),
        )
        .await;

        // "not set up" is distinct from "wrong code".
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verify_malformed_code() {
        let state = router::state();
        state.enrollment.setup("alice").await.unwrap();

        let response = make_request(
            app(state),
            Method::POST,
            "/2fa/verify",
            json!({ "account_id": "alice", "code": "12345" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = read(response).await;
        assert!(!body.valid);
        assert!(!body.used_backup_code);
    }

    #[tokio::test]
    async fn test_verify_live_token() {
        let state = router::state();
        let setup = state.enrollment.setup("bob").await.unwrap();

        let step = crate::totp::current_step(30).unwrap();
        let code = crate::totp::generate(&setup.secret, step, 6).unwrap();

        let response = make_request(
            app(state),
            Method::POST,
            "/2fa/verify",
            json!({ "account_id": "bob", "code": code }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = read(response).await;
        assert!(body.valid);
        assert!(!body.used_backup_code);
        assert!(body.drift.is_some());
    }

    #[tokio::test]
    async fn test_verify_backup_code() {
        let state = router::state();
        let setup = state.enrollment.setup("carol").await.unwrap();
        let code = setup.backup_codes[0].clone();

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/2fa/verify",
            json!({ "account_id": "carol", "code": code }).to_string(),
        )
        .await;
        let body = read(response).await;
        assert!(body.valid);
        assert!(body.used_backup_code);

        // consumed: the same code must not validate a second request.
        let response = make_request(
            app(state),
            Method::POST,
            "/2fa/verify",
            json!({ "account_id": "carol", "code": code }).to_string(),
        )
        .await;
        let body = read(response).await;
        assert!(!body.valid);
    }
}
