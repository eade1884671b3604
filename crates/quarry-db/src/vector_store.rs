//! Per-index vector table lifecycle, upserts, and ANN queries.

use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use quarry_core::{defaults, Error, Result};

/// One row returned by an ANN query, before snippet truncation.
#[derive(Debug, Clone)]
pub struct AnnHit {
    pub url: String,
    pub title: String,
    pub content: String,
    /// `1 − cosine distance`.
    pub score: f32,
}

/// PostgreSQL vector store keeping one table per index.
pub struct PgVectorStore {
    pool: PgPool,
}

/// Table name for an index.
pub fn table_name(index_name: &str) -> String {
    format!("docs_{}", index_name)
}

/// Validate a derived index name before it is embedded in an identifier.
///
/// Index names come out of [`quarry_core::derive_index_name`] as lowercase
/// alphanumerics and single dashes; anything else is rejected here so no
/// unvetted string ever reaches a DDL statement.
pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("Index name cannot be empty".to_string()));
    }
    // PostgreSQL truncates identifiers beyond 63 characters; with the
    // `docs_` prefix that leaves 58 for the index name.
    if name.len() > 58 {
        return Err(Error::InvalidInput(format!(
            "Index name exceeds identifier limit: {} characters",
            name.len()
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::InvalidInput(format!(
            "Index name has a leading or trailing dash: {}",
            name
        )));
    }
    for ch in name.chars() {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' {
            return Err(Error::InvalidInput(format!(
                "Index name contains invalid character '{}': {}",
                ch, name
            )));
        }
    }
    Ok(())
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensure the per-index table exists with the given vector dimension.
    ///
    /// A pre-existing table whose embedding column has a different declared
    /// dimension is dropped and recreated; chunks are re-ingestable from
    /// source.
    pub async fn ensure_store(&self, index_name: &str, dimension: usize) -> Result<()> {
        validate_index_name(index_name)?;
        let table = table_name(index_name);

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if let Some(existing) = self.declared_dimension(&table).await? {
            if existing != dimension as i32 {
                warn!(
                    subsystem = "db",
                    component = "vector_store",
                    index_name = %index_name,
                    existing,
                    requested = dimension,
                    "Embedding dimension changed, dropping table"
                );
                sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table))
                    .execute(&self.pool)
                    .await
                    .map_err(Error::Database)?;
            }
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                 id         UUID PRIMARY KEY,
                 url        TEXT NOT NULL,
                 title      TEXT NOT NULL,
                 content    TEXT NOT NULL,
                 embedding  vector({dimension}),
                 metadata   JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )"
        ))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{table}_url_idx\" ON \"{table}\" (url)"
        ))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.ensure_ann_index(&table, dimension).await;

        debug!(
            subsystem = "db",
            component = "vector_store",
            op = "ensure_store",
            index_name = %index_name,
            dimension,
            "Vector store ready"
        );
        Ok(())
    }

    /// Create the ANN index, preferring HNSW and falling back to IVFFlat.
    ///
    /// When neither applies (dimension too large), queries fall back to a
    /// sequential scan, which is correct but slower.
    async fn ensure_ann_index(&self, table: &str, dimension: usize) {
        let hnsw = format!(
            "CREATE INDEX IF NOT EXISTS \"{table}_embedding_idx\"
             ON \"{table}\" USING hnsw (embedding vector_cosine_ops)"
        );
        if let Err(hnsw_err) = sqlx::query(&hnsw).execute(&self.pool).await {
            if dimension <= defaults::IVFFLAT_MAX_DIMENSION {
                let ivfflat = format!(
                    "CREATE INDEX IF NOT EXISTS \"{table}_embedding_idx\"
                     ON \"{table}\" USING ivfflat (embedding vector_cosine_ops)
                     WITH (lists = {})",
                    defaults::IVFFLAT_LISTS
                );
                match sqlx::query(&ivfflat).execute(&self.pool).await {
                    Ok(_) => {
                        info!(
                            subsystem = "db",
                            component = "vector_store",
                            table = %table,
                            "HNSW unavailable, created IVFFlat index"
                        );
                    }
                    Err(ivf_err) => {
                        warn!(
                            subsystem = "db",
                            component = "vector_store",
                            table = %table,
                            hnsw_error = %hnsw_err,
                            ivfflat_error = %ivf_err,
                            "No ANN index available, queries will scan"
                        );
                    }
                }
            } else {
                warn!(
                    subsystem = "db",
                    component = "vector_store",
                    table = %table,
                    dimension,
                    error = %hnsw_err,
                    "Dimension too large for ANN index, queries will scan"
                );
            }
        }
    }

    /// Declared dimension of the embedding column, when the table exists.
    async fn declared_dimension(&self, table: &str) -> Result<Option<i32>> {
        let dimension: Option<i32> = sqlx::query_scalar(
            "SELECT a.atttypmod
             FROM pg_attribute a
             JOIN pg_class c ON c.oid = a.attrelid
             WHERE c.relname = $1 AND a.attname = 'embedding'",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(dimension)
    }

    /// Whether the per-index table exists.
    pub async fn store_exists(&self, index_name: &str) -> Result<bool> {
        validate_index_name(index_name)?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_class WHERE relname = $1 AND relkind = 'r')",
        )
        .bind(table_name(index_name))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    /// Insert a chunk row, replacing any previous row with the same url.
    pub async fn upsert(
        &self,
        index_name: &str,
        url: &str,
        title: &str,
        content: &str,
        embedding: &Vector,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        validate_index_name(index_name)?;
        let table = table_name(index_name);

        sqlx::query(&format!(
            "INSERT INTO \"{table}\" (id, url, title, content, embedding, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (url) DO UPDATE SET
                 title = EXCLUDED.title,
                 content = EXCLUDED.content,
                 embedding = EXCLUDED.embedding,
                 metadata = EXCLUDED.metadata"
        ))
        .bind(Uuid::now_v7())
        .bind(url)
        .bind(title)
        .bind(content)
        .bind(embedding)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Top-k nearest chunks by cosine distance.
    ///
    /// Equal distances are broken by ascending url so results are stable.
    pub async fn ann_search(
        &self,
        index_name: &str,
        query: &Vector,
        k: i64,
    ) -> Result<Vec<AnnHit>> {
        validate_index_name(index_name)?;
        let table = table_name(index_name);

        let rows = sqlx::query(&format!(
            "SELECT url, title, content,
                    1 - (embedding <=> $1::vector) AS score
             FROM \"{table}\"
             ORDER BY embedding <=> $1::vector ASC, url ASC
             LIMIT $2"
        ))
        .bind(query)
        .bind(k)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let hits = rows
            .into_iter()
            .map(|row| AnnHit {
                url: row.get("url"),
                title: row.get("title"),
                content: row.get("content"),
                score: row.get::<f64, _>("score") as f32,
            })
            .collect();
        Ok(hits)
    }

    /// Number of chunk rows in an index.
    pub async fn chunk_count(&self, index_name: &str) -> Result<i64> {
        validate_index_name(index_name)?;
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM \"{}\"",
            table_name(index_name)
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    /// Drop the per-index table entirely.
    pub async fn drop_store(&self, index_name: &str) -> Result<()> {
        validate_index_name(index_name)?;
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS \"{}\"",
            table_name(index_name)
        ))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
