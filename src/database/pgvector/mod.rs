// Vector backend on PostgreSQL with the pgvector extension.
// One table per collection; `<=>` yields cosine distance, lower is closer.


use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    Lifecycle, NativeHit, VectorBackend, VectorCollection, VectorPoint, sql_identifier, sqlx_error,
};
use crate::config::PgvectorConfig;
use crate::identifier::{BackendKind, IdFormat, RecordId};
use crate::score::ScoreConvention;
use crate::{Result, StoreError};

const KIND: BackendKind = BackendKind::VectorPgvector;

#[derive(Debug, Clone)]
pub struct PgVectorStore {
    pool: PgPool,
    lifecycle: Lifecycle,
}

impl PgVectorStore {
    /// Open the pool and run one round trip so an unreachable server fails here
    pub async fn new(config: &PgvectorConfig) -> Result<Self> {
        let store = Self::build(config)?;
        sqlx::query("SELECT 1")
            .execute(&store.pool)
            .await
            .map_err(|e| sqlx_error(KIND, e))?;

        info!("Using pgvector pool with {} connections", config.max_connections);
        Ok(store)
    }

    /// Lazy pool that connects on first use
    pub(crate) fn build(config: &PgvectorConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.timeout_seconds))
            .connect_lazy(&config.url)
            .map_err(|e| sqlx_error(KIND, e))?;

        Ok(Self {
            pool,
            lifecycle: Lifecycle::default(),
        })
    }
}

#[async_trait]
impl VectorBackend for PgVectorStore {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::CosineDistance
    }

    fn collection(&self, name: &str) -> Arc<dyn VectorCollection> {
        Arc::new(PgVectorTable {
            pool: self.pool.clone(),
            name: name.to_string(),
            table: sql_identifier(name),
            lifecycle: self.lifecycle.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing pgvector pool");
            self.pool.close().await;
        }
        Ok(())
    }
}

struct PgVectorTable {
    pool: PgPool,
    name: String,
    table: String,
    lifecycle: Lifecycle,
}

#[async_trait]
impl VectorCollection for PgVectorTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure(&self, dimension: usize) -> Result<()> {
        self.lifecycle.check(KIND)?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_error(KIND, e))?;
        sqlx::query(&create_table_sql(&self.table, dimension))
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_error(KIND, e))?;

        debug!("Ensured pgvector table {}", self.table);
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        self.lifecycle.check(KIND)?;
        if points.is_empty() {
            return Ok(());
        }

        let statement = upsert_sql(&self.table);
        let mut tx = self.pool.begin().await.map_err(|e| sqlx_error(KIND, e))?;
        for point in points {
            sqlx::query(&statement)
                .bind(to_uuid(&point.id)?)
                .bind(&point.document_id)
                .bind(Vector::from(point.vector.clone()))
                .execute(&mut *tx)
                .await
                .map_err(|e| sqlx_error(KIND, e))?;
        }
        tx.commit().await.map_err(|e| sqlx_error(KIND, e))?;

        debug!("Upserted {} rows into {}", points.len(), self.table);
        Ok(())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<()> {
        self.lifecycle.check(KIND)?;
        if ids.is_empty() {
            return Ok(());
        }

        let ids = ids.iter().map(to_uuid).collect::<Result<Vec<Uuid>>>()?;
        sqlx::query(&format!("DELETE FROM {} WHERE id = ANY($1)", self.table))
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| sqlx_error(KIND, e))?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<NativeHit>> {
        self.lifecycle.check(KIND)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&search_sql(&self.table))
            .bind(Vector::from(vector.to_vec()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| sqlx_error(KIND, e))?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(|e| sqlx_error(KIND, e))?;
                Ok(NativeHit {
                    id: id.to_string(),
                    document_id: row.try_get("document_id").map_err(|e| sqlx_error(KIND, e))?,
                    score: row.try_get("distance").map_err(|e| sqlx_error(KIND, e))?,
                })
            })
            .collect()
    }
}

fn create_table_sql(table: &str, dimension: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id UUID PRIMARY KEY, document_id TEXT NOT NULL, embedding vector({}) NOT NULL)",
        table, dimension
    )
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} (id, document_id, embedding) VALUES ($1, $2, $3) \
         ON CONFLICT (id) DO UPDATE SET document_id = EXCLUDED.document_id, embedding = EXCLUDED.embedding",
        table
    )
}

fn search_sql(table: &str) -> String {
    format!(
        "SELECT id, document_id, (embedding <=> $1)::float8 AS distance \
         FROM {} ORDER BY embedding <=> $1 LIMIT $2",
        table
    )
}

fn to_uuid(id: &RecordId) -> Result<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| StoreError::InvalidIdentifier {
        format: IdFormat::Uuid,
        raw: id.to_string(),
    })
}
