//! HTTP API surface.

pub mod status;
pub mod twofactor;

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ServerError;

/// JSON extractor that runs `validator` checks before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Test state backed by the in-process store.
#[cfg(test)]
pub(crate) fn state() -> crate::AppState {
    use std::sync::Arc;

    use crate::config::Configuration;
    use crate::crypto::Crypto;
    use crate::database::Database;
    use crate::enrollment::{EnrollmentRepository, EnrollmentService};

    let config = Arc::new(Configuration::default());
    let crypto = Arc::new(
        Crypto::new(
            Some(crate::crypto::tests::test_config()),
            "test-master-key",
            "0123456789abcdef",
        )
        .expect("cannot build test crypto"),
    );

    let enrollment = EnrollmentService::new(
        EnrollmentRepository::new(Database::memory()),
        crypto,
        config.totp.clone(),
        "keystep-test",
    );

    crate::AppState { config, enrollment }
}
