//! Two-factor enrollments: one record per account, holding the encrypted
//! shared secret and the remaining recovery codes.

mod repository;
mod service;

pub use repository::*;
pub use service::*;

/// Enrollment as saved on database.
///
/// The plaintext secret exists only during setup (returned once) and for
/// the duration of a single verification; at rest only `secret_cipher`
/// remains.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct Enrollment {
    pub account_id: String,
    /// hex(nonce || AES-256-GCM ciphertext) of the base32 secret.
    pub secret_cipher: String,
    /// Set once the user confirmed a first code.
    pub is_active: bool,
    /// Highest time step that already authenticated, to refuse replays
    /// inside the drift window.
    pub last_used_step: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A recovery code at rest: deterministic digest for lookup, ciphertext
/// for operator recovery display.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct BackupCode {
    pub code_hash: String,
    pub code_cipher: String,
}
