//! Enrollment manager: the four operations exposed by the API.

use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroizing;

use crate::backup;
use crate::config::Totp;
use crate::crypto::Crypto;
use crate::enrollment::{BackupCode, Enrollment, EnrollmentRepository};
use crate::error::{Result, ServerError};
use crate::totp;

/// Freshly generated credentials, returned in plaintext exactly once.
#[derive(Debug)]
pub struct Setup {
    pub secret: String,
    pub backup_codes: Vec<String>,
    pub provisioning_uri: String,
}

/// Outcome of a verification attempt.
#[derive(Debug, Default, PartialEq)]
pub struct Verification {
    pub valid: bool,
    pub used_backup_code: bool,
    /// Matched window offset in steps, for drift diagnostics.
    pub drift: Option<i64>,
}

impl Verification {
    fn invalid() -> Self {
        Self::default()
    }
}

/// Enrollment manager.
#[derive(Clone)]
pub struct EnrollmentService {
    repo: EnrollmentRepository,
    crypto: Arc<Crypto>,
    totp: Totp,
    issuer: String,
}

impl EnrollmentService {
    /// Create a new [`EnrollmentService`].
    pub fn new(
        repo: EnrollmentRepository,
        crypto: Arc<Crypto>,
        totp: Totp,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            crypto,
            totp,
            issuer: issuer.into(),
        }
    }

    /// Generate a secret and recovery codes for an account, persist them
    /// encrypted and inactive, and hand the plaintexts back for one-time
    /// display.
    pub async fn setup(&self, account_id: &str) -> Result<Setup> {
        let secret = totp::generate_secret(self.totp.secret_length)?;
        let backup_codes = backup::generate_codes(self.totp.backup_codes)?;

        let enrollment = Enrollment {
            account_id: account_id.to_owned(),
            secret_cipher: self.crypto.symmetric.encrypt_and_hex(&secret)?,
            is_active: false,
            last_used_step: None,
            created_at: Utc::now(),
        };

        let stored_codes = backup_codes
            .iter()
            .map(|code| {
                Ok(BackupCode {
                    code_hash: self.crypto.hasher.digest(code),
                    code_cipher: self.crypto.symmetric.encrypt_and_hex(code)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.repo.replace(&enrollment, &stored_codes).await?;

        tracing::info!(account_id, "two-factor enrollment created");

        let provisioning_uri =
            totp::provisioning_uri(&secret, account_id, &self.issuer);

        Ok(Setup {
            secret,
            backup_codes,
            provisioning_uri,
        })
    }

    /// Verify a submitted code: 6 digits go through the TOTP window, an
    /// 8-character recovery code consumes its entry, anything else is
    /// invalid before any cryptographic work.
    pub async fn verify(
        &self,
        account_id: &str,
        code: &str,
    ) -> Result<Verification> {
        let code = code.trim();

        if totp::is_code_format(code, self.totp.digits) {
            return self.verify_totp(account_id, code).await;
        }

        let recovery = code.to_ascii_uppercase();
        if backup::is_code_format(&recovery) {
            return self.verify_backup_code(account_id, &recovery).await;
        }

        Ok(Verification::invalid())
    }

    async fn verify_totp(
        &self,
        account_id: &str,
        code: &str,
    ) -> Result<Verification> {
        let enrollment = self.repo.find(account_id).await?;

        // decrypted secret lives only for this call.
        let secret = Zeroizing::new(
            self.crypto
                .symmetric
                .decrypt_from_hex(&enrollment.secret_cipher)?,
        );

        let matched = totp::verify(
            &secret,
            code,
            self.totp.period,
            self.totp.window,
            self.totp.digits,
        )?;

        let Some(drift) = matched else {
            return Ok(Verification::invalid());
        };

        let step = totp::current_step(self.totp.period)?
            .checked_add_signed(drift)
            .ok_or(ServerError::Internal {
                details: "time step out of range".to_owned(),
            })?;

        // a token is bound to its step: a second use of the same step is a
        // replay, even though the code itself matches.
        if !self.repo.record_used_step(account_id, step as i64).await? {
            tracing::warn!(account_id, step, "replayed one-time password");
            return Ok(Verification::invalid());
        }

        Ok(Verification {
            valid: true,
            used_backup_code: false,
            drift: Some(drift),
        })
    }

    async fn verify_backup_code(
        &self,
        account_id: &str,
        code: &str,
    ) -> Result<Verification> {
        // surface "not set up" before anything else.
        self.repo.find(account_id).await?;

        if self.repo.count_backup_codes(account_id).await? == 0 {
            return Err(ServerError::NoBackupCodesRemaining);
        }

        let consumed = self
            .repo
            .consume_backup_code(account_id, &self.crypto.hasher.digest(code))
            .await?;

        if consumed {
            tracing::info!(account_id, "backup code consumed");
        }

        Ok(Verification {
            valid: consumed,
            used_backup_code: consumed,
            drift: None,
        })
    }

    /// Mark the enrollment as the account's active 2FA method.
    pub async fn activate(&self, account_id: &str) -> Result<()> {
        self.repo.activate(account_id).await
    }

    /// Remove the enrollment record and every remaining recovery code.
    pub async fn disable(&self, account_id: &str) -> Result<()> {
        self.repo.delete(account_id).await
    }
}
