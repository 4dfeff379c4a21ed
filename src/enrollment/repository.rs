//! Handle storage requests for enrollments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sqlx::PgPool;

use crate::backup;
use crate::database::Database;
use crate::enrollment::{BackupCode, Enrollment};
use crate::error::{Result, ServerError};

/// In-process backend used when no PostgreSQL is configured.
///
/// A single mutex over the whole map: every consuming update is one
/// critical section, which gives the same read-modify-write atomicity the
/// SQL conditional statements provide.
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Mutex<HashMap<String, StoredEnrollment>>>);

#[derive(Clone)]
struct StoredEnrollment {
    enrollment: Enrollment,
    codes: Vec<BackupCode>,
}

impl MemoryStore {
    fn with<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, StoredEnrollment>) -> T,
    ) -> T {
        let mut map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut map)
    }
}

#[derive(Clone)]
pub struct EnrollmentRepository {
    db: Database,
}

impl EnrollmentRepository {
    /// Create a new [`EnrollmentRepository`].
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an [`Enrollment`] with its recovery codes, replacing any
    /// previous enrollment of the account. Re-enrollment is always a full
    /// regeneration, never an in-place mutation.
    pub async fn replace(
        &self,
        enrollment: &Enrollment,
        codes: &[BackupCode],
    ) -> Result<()> {
        match &self.db {
            Database::Postgres(pool) => {
                self.replace_postgres(pool, enrollment, codes).await
            },
            Database::Memory(store) => {
                store.with(|map| {
                    map.insert(
                        enrollment.account_id.clone(),
                        StoredEnrollment {
                            enrollment: enrollment.clone(),
                            codes: codes.to_vec(),
                        },
                    );
                });
                Ok(())
            },
        }
    }

    async fn replace_postgres(
        &self,
        pool: &PgPool,
        enrollment: &Enrollment,
        codes: &[BackupCode],
    ) -> Result<()> {
        let mut tx = pool.begin().await?;

        // backup codes follow through ON DELETE CASCADE.
        sqlx::query("DELETE FROM enrollments WHERE account_id = $1")
            .bind(&enrollment.account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO enrollments (account_id, secret_cipher, is_active, last_used_step, created_at)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&enrollment.account_id)
        .bind(&enrollment.secret_cipher)
        .bind(enrollment.is_active)
        .bind(enrollment.last_used_step)
        .bind(enrollment.created_at)
        .execute(&mut *tx)
        .await?;

        for code in codes {
            sqlx::query(
                r#"INSERT INTO backup_codes (account_id, code_hash, code_cipher)
                    VALUES ($1, $2, $3)"#,
            )
            .bind(&enrollment.account_id)
            .bind(&code.code_hash)
            .bind(&code.code_cipher)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Find the enrollment of an account.
    pub async fn find(&self, account_id: &str) -> Result<Enrollment> {
        match &self.db {
            Database::Postgres(pool) => sqlx::query_as::<_, Enrollment>(
                r#"SELECT account_id, secret_cipher, is_active, last_used_step, created_at
                    FROM enrollments WHERE account_id = $1"#,
            )
            .bind(account_id)
            .fetch_optional(pool)
            .await?
            .ok_or(ServerError::NotEnrolled),
            Database::Memory(store) => store.with(|map| {
                map.get(account_id)
                    .map(|stored| stored.enrollment.clone())
                    .ok_or(ServerError::NotEnrolled)
            }),
        }
    }

    /// Mark the enrollment as the account's active 2FA method.
    pub async fn activate(&self, account_id: &str) -> Result<()> {
        match &self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE enrollments SET is_active = TRUE WHERE account_id = $1",
                )
                .bind(account_id)
                .execute(pool)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(ServerError::NotEnrolled);
                }
                Ok(())
            },
            Database::Memory(store) => store.with(|map| {
                let stored =
                    map.get_mut(account_id).ok_or(ServerError::NotEnrolled)?;
                stored.enrollment.is_active = true;
                Ok(())
            }),
        }
    }

    /// Delete the enrollment and every remaining recovery code.
    pub async fn delete(&self, account_id: &str) -> Result<()> {
        match &self.db {
            Database::Postgres(pool) => {
                let result =
                    sqlx::query("DELETE FROM enrollments WHERE account_id = $1")
                        .bind(account_id)
                        .execute(pool)
                        .await?;

                if result.rows_affected() == 0 {
                    return Err(ServerError::NotEnrolled);
                }
                Ok(())
            },
            Database::Memory(store) => store.with(|map| {
                map.remove(account_id)
                    .map(|_| ())
                    .ok_or(ServerError::NotEnrolled)
            }),
        }
    }

    /// How many recovery codes the account has left.
    pub async fn count_backup_codes(&self, account_id: &str) -> Result<i64> {
        match &self.db {
            Database::Postgres(pool) => Ok(sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM backup_codes WHERE account_id = $1",
            )
            .bind(account_id)
            .fetch_one(pool)
            .await?),
            Database::Memory(store) => store.with(|map| {
                Ok(map
                    .get(account_id)
                    .map(|stored| stored.codes.len() as i64)
                    .unwrap_or(0))
            }),
        }
    }

    /// Consume a recovery code: a single conditional delete keyed on the
    /// digest, so two concurrent attempts with the same code cannot both
    /// observe a row. Returns whether a code was consumed.
    pub async fn consume_backup_code(
        &self,
        account_id: &str,
        code_hash: &str,
    ) -> Result<bool> {
        match &self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query(
                    "DELETE FROM backup_codes WHERE account_id = $1 AND code_hash = $2",
                )
                .bind(account_id)
                .bind(code_hash)
                .execute(pool)
                .await?;

                Ok(result.rows_affected() == 1)
            },
            Database::Memory(store) => store.with(|map| {
                let Some(stored) = map.get_mut(account_id) else {
                    return Ok(false);
                };

                let position = stored
                    .codes
                    .iter()
                    .position(|code| backup::matches(code_hash, &code.code_hash));

                match position {
                    Some(index) => {
                        stored.codes.remove(index);
                        Ok(true)
                    },
                    None => Ok(false),
                }
            }),
        }
    }

    /// Record the time step that just authenticated. Monotonic: fails when
    /// the step was already used (or a later one was), closing the replay
    /// window inside a single step. Returns whether the step was fresh.
    pub async fn record_used_step(
        &self,
        account_id: &str,
        step: i64,
    ) -> Result<bool> {
        match &self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query(
                    r#"UPDATE enrollments SET last_used_step = $2
                        WHERE account_id = $1
                        AND (last_used_step IS NULL OR last_used_step < $2)"#,
                )
                .bind(account_id)
                .bind(step)
                .execute(pool)
                .await?;

                Ok(result.rows_affected() == 1)
            },
            Database::Memory(store) => store.with(|map| {
                let Some(stored) = map.get_mut(account_id) else {
                    return Ok(false);
                };

                match stored.enrollment.last_used_step {
                    Some(last) if last >= step => Ok(false),
                    _ => {
                        stored.enrollment.last_used_step = Some(step);
                        Ok(true)
                    },
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn repository() -> EnrollmentRepository {
        EnrollmentRepository::new(Database::memory())
    }

    fn enrollment(account_id: &str) -> Enrollment {
        Enrollment {
            account_id: account_id.into(),
            secret_cipher: "00".into(),
            is_active: false,
            last_used_step: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn backup_code_is_single_use() {
        let repo = repository();
        let codes = vec![BackupCode {
            code_hash: "hash-1".into(),
            code_cipher: "aa".into(),
        }];
        repo.replace(&enrollment("alice"), &codes).await.unwrap();

        assert!(repo.consume_backup_code("alice", "hash-1").await.unwrap());
        // destructive consumption: the same code never matches twice.
        assert!(!repo.consume_backup_code("alice", "hash-1").await.unwrap());
        assert_eq!(repo.count_backup_codes("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn used_step_is_monotonic() {
        let repo = repository();
        repo.replace(&enrollment("bob"), &[]).await.unwrap();

        assert!(repo.record_used_step("bob", 100).await.unwrap());
        assert!(!repo.record_used_step("bob", 100).await.unwrap());
        assert!(!repo.record_used_step("bob", 99).await.unwrap());
        assert!(repo.record_used_step("bob", 101).await.unwrap());
    }

    #[tokio::test]
    async fn replace_regenerates_everything() {
        let repo = repository();
        let codes = vec![BackupCode {
            code_hash: "old".into(),
            code_cipher: "aa".into(),
        }];
        repo.replace(&enrollment("carol"), &codes).await.unwrap();
        repo.activate("carol").await.unwrap();

        // re-enrollment drops the active flag and the old codes.
        repo.replace(&enrollment("carol"), &[]).await.unwrap();
        let stored = repo.find("carol").await.unwrap();
        assert!(!stored.is_active);
        assert!(!repo.consume_backup_code("carol", "old").await.unwrap());
    }

    #[tokio::test]
    async fn missing_account_surfaces_not_enrolled() {
        let repo = repository();

        assert!(matches!(
            repo.find("nobody").await,
            Err(ServerError::NotEnrolled),
        ));
        assert!(matches!(
            repo.activate("nobody").await,
            Err(ServerError::NotEnrolled),
        ));
        assert!(matches!(
            repo.delete("nobody").await,
            Err(ServerError::NotEnrolled),
        ));
    }
}
