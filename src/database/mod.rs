// Database module
// Backend clients for document stores and vector stores behind two capability traits

pub mod cosmos;
pub(crate) mod http;
pub mod lancedb;
pub mod mongo;
pub mod oracle;
pub mod pgvector;
pub mod qdrant;
pub mod sqlite;


use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::config::Config;
use crate::identifier::{BackendKind, RecordId};
use crate::score::ScoreConvention;
use crate::{Result, StoreError};

pub type JsonMap = serde_json::Map<String, Value>;

/// A point written into a vector collection
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Point id in the vector backend's own format
    pub id: RecordId,
    /// Id of the document the vector was computed from
    pub document_id: String,
    pub vector: Vec<f32>,
}

/// Search hit exactly as the vector backend reported it
#[derive(Debug, Clone, PartialEq)]
pub struct NativeHit {
    pub id: String,
    pub document_id: String,
    pub score: f64,
}

/// Read/write access to one document collection.
///
/// Bodies are JSON objects; every returned body carries its canonical `id`.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace the document stored under `id`
    async fn upsert(&self, id: &RecordId, body: &JsonMap) -> Result<()>;

    async fn get(&self, id: &RecordId) -> Result<Option<JsonMap>>;

    /// Documents whose top-level string attribute `field` equals `value`
    async fn find_eq(&self, field: &str, value: &str) -> Result<Vec<JsonMap>>;

    async fn list(&self, limit: usize) -> Result<Vec<JsonMap>>;

    /// Returns whether a document was removed
    async fn delete(&self, id: &RecordId) -> Result<bool>;
}

/// Read/write access to one vector collection
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Create the collection if it does not exist yet
    async fn ensure(&self, dimension: usize) -> Result<()>;

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    async fn delete(&self, ids: &[RecordId]) -> Result<()>;

    /// Nearest neighbours by cosine metric, closest first
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<NativeHit>>;
}

/// A connection to one physical document database
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Local handle; performs no I/O until an operation is awaited
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;

    /// Release connections. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// A connection to one physical vector database
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn score_convention(&self) -> ScoreConvention;

    /// Local handle; performs no I/O until an operation is awaited
    fn collection(&self, name: &str) -> Arc<dyn VectorCollection>;

    /// Release connections. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Open/closed state shared between a backend and the handles it gave out
#[derive(Debug, Clone, Default)]
pub(crate) struct Lifecycle {
    closed: Arc<AtomicBool>,
}

impl Lifecycle {
    /// Marks the backend closed, returning true only for the first call
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn check(&self, backend: BackendKind) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(backend.as_str(), "client is closed"));
        }
        Ok(())
    }
}

/// Build the document backend selected in configuration
pub async fn connect_document_backend(config: &Config) -> Result<Arc<dyn DocumentBackend>> {
    let kind = config.storage.document_kind()?;
    info!("Connecting document backend {}", kind);

    let backend: Arc<dyn DocumentBackend> = match kind {
        BackendKind::DocSqlite => Arc::new(
            sqlite::SqliteDocumentStore::new(
                config.database_path(),
                config.storage.sqlite.max_connections,
            )
            .await?,
        ),
        BackendKind::DocMongo => {
            Arc::new(mongo::MongoDocumentStore::new(&config.storage.mongo).await?)
        }
        BackendKind::DocCosmos => {
            Arc::new(cosmos::CosmosDocumentStore::new(&config.storage.cosmos).await?)
        }
        BackendKind::VectorLance
        | BackendKind::VectorQdrant
        | BackendKind::VectorPgvector
        | BackendKind::VectorOracle => {
            return Err(StoreError::UnsupportedBackend(format!(
                "{} is not a document backend",
                kind
            )));
        }
    };

    Ok(backend)
}

/// Build the vector backend selected in configuration
pub async fn connect_vector_backend(config: &Config) -> Result<Arc<dyn VectorBackend>> {
    let kind = config.storage.vector_kind()?;
    info!("Connecting vector backend {}", kind);

    let backend: Arc<dyn VectorBackend> = match kind {
        BackendKind::VectorLance => {
            Arc::new(lancedb::LanceVectorStore::new(config.vector_database_path()).await?)
        }
        BackendKind::VectorQdrant => {
            Arc::new(qdrant::QdrantVectorStore::new(&config.storage.qdrant).await?)
        }
        BackendKind::VectorPgvector => {
            Arc::new(pgvector::PgVectorStore::new(&config.storage.pgvector).await?)
        }
        BackendKind::VectorOracle => {
            Arc::new(oracle::OracleVectorStore::new(&config.storage.oracle).await?)
        }
        BackendKind::DocSqlite | BackendKind::DocMongo | BackendKind::DocCosmos => {
            return Err(StoreError::UnsupportedBackend(format!(
                "{} is not a vector backend",
                kind
            )));
        }
    };

    Ok(backend)
}

/// Render a vector in the `[x,y,z]` text form understood by SQL vector types
pub(crate) fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Vector collection names become table names on SQL backends
pub(crate) fn sql_identifier(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Pool and I/O failures are transient; anything the server refused is not
pub(crate) fn sqlx_error(backend: BackendKind, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::unavailable(backend.as_str(), err),
        other => StoreError::BackendRejected {
            backend: backend.to_string(),
            message: other.to_string(),
        },
    }
}
