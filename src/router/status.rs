//! Instance descriptor.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::config::Configuration;

/// Public instance information: name, URL, version, TOTP profile.
pub async fn handler(
    State(config): State<Arc<Configuration>>,
) -> Json<Configuration> {
    Json((*config).clone())
}
