//! # quarry-db
//!
//! PostgreSQL layer for quarry.
//!
//! This crate provides:
//! - Connection pool management
//! - Per-index vector tables with ANN indexes (pgvector)
//! - The durable indexing-job store and its state machine
//! - Session links and per-index access grants
//! - The cross-process embedding rate window (advisory lock + counter row)

pub mod access;
pub mod jobs;
pub mod pool;
pub mod rate_window;
pub mod schema;
pub mod vector_store;

// Re-export core types
pub use quarry_core::*;

pub use access::PgAccessStore;
pub use jobs::{CreateJobRequest, PgJobStore};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use rate_window::PgRateWindow;
pub use schema::ensure_schema;
pub use vector_store::{table_name, validate_index_name, AnnHit, PgVectorStore};

/// Combined database context with all stores.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::PgPool,
    /// Per-index vector tables.
    pub store: PgVectorStore,
    /// Indexing job rows.
    pub jobs: PgJobStore,
    /// Session links and grants.
    pub access: PgAccessStore,
}

impl Database {
    /// Connect and ensure the shared schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        ensure_schema(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool without touching the schema.
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self {
            store: PgVectorStore::new(pool.clone()),
            jobs: PgJobStore::new(pool.clone()),
            access: PgAccessStore::new(pool.clone()),
            pool,
        }
    }

    /// Build a distributed rate window sharing this database.
    pub fn rate_window(
        &self,
        requests_per_minute: u64,
        tokens_per_minute: u64,
        tokens_per_day: u64,
    ) -> PgRateWindow {
        PgRateWindow::new(
            self.pool.clone(),
            requests_per_minute,
            tokens_per_minute,
            tokens_per_day,
        )
    }
}
