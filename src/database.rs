//! Database backends.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::enrollment::MemoryStore;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "keystep";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Storage backend for enrollments.
///
/// Postgres in production; an in-process map when no `postgres` section is
/// configured, so the service runs without infrastructure for demos and
/// tests. Both give the same atomicity on backup-code consumption.
#[derive(Clone)]
pub enum Database {
    Postgres(PgPool),
    Memory(MemoryStore),
}

impl Database {
    /// Init PostgreSQL connection pool.
    pub async fn new(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self, sqlx::Error> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool);
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self::Postgres(postgres))
    }

    /// In-process storage.
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::default())
    }
}
