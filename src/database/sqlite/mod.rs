use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{DocumentBackend, DocumentCollection, JsonMap, Lifecycle, sqlx_error};
use crate::identifier::{BackendKind, RecordId};
use crate::{Result, StoreError};


pub mod models;
pub mod queries;

pub use queries::{DocumentQueries, SyncStateQueries};

pub type DbPool = Pool<Sqlite>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection   TEXT NOT NULL,
        id           TEXT NOT NULL,
        body         TEXT NOT NULL,
        created_date TEXT NOT NULL,
        updated_date TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        source_name  TEXT NOT NULL,
        collection   TEXT NOT NULL,
        record_id    TEXT NOT NULL,
        document_id  TEXT NOT NULL,
        fingerprint  TEXT,
        synced_date  TEXT NOT NULL,
        PRIMARY KEY (source_name, collection, record_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_runs (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        source_name   TEXT NOT NULL,
        collection    TEXT NOT NULL,
        added         INTEGER NOT NULL,
        deleted       INTEGER NOT NULL,
        finished_date TEXT NOT NULL
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| sqlx_error(BackendKind::DocSqlite, e))?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| sqlx_error(BackendKind::DocSqlite, e))?;
        }

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Document backend storing every collection in one SQLite table
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    database: Database,
    lifecycle: Lifecycle,
}

impl SqliteDocumentStore {
    pub async fn new<P: AsRef<Path>>(database_path: P, max_connections: u32) -> Result<Self> {
        if let Some(parent) = database_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let database = Database::new(database_path, max_connections).await?;
        Ok(Self::from_database(database))
    }

    pub fn from_database(database: Database) -> Self {
        Self {
            database,
            lifecycle: Lifecycle::default(),
        }
    }

    /// The underlying database, shared with the sync state store
    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl DocumentBackend for SqliteDocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::DocSqlite
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(SqliteCollection {
            pool: self.database.pool.clone(),
            name: name.to_string(),
            lifecycle: self.lifecycle.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing SQLite document store");
            self.database.close().await;
        }
        Ok(())
    }
}

struct SqliteCollection {
    pool: DbPool,
    name: String,
    lifecycle: Lifecycle,
}

#[async_trait]
impl DocumentCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, id: &RecordId, body: &JsonMap) -> Result<()> {
        self.lifecycle.check(BackendKind::DocSqlite)?;
        let mut stored = body.clone();
        stored.insert("id".to_string(), id.as_str().into());
        let body = serde_json::to_string(&stored)?;
        DocumentQueries::upsert(&self.pool, &self.name, id.as_str(), &body).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<JsonMap>> {
        self.lifecycle.check(BackendKind::DocSqlite)?;
        DocumentQueries::get(&self.pool, &self.name, id.as_str())
            .await?
            .map(|row| row.into_body())
            .transpose()
    }

    async fn find_eq(&self, field: &str, value: &str) -> Result<Vec<JsonMap>> {
        self.lifecycle.check(BackendKind::DocSqlite)?;
        if field.contains('"') {
            return Err(StoreError::BackendRejected {
                backend: BackendKind::DocSqlite.to_string(),
                message: format!("unsupported field name {:?}", field),
            });
        }
        DocumentQueries::find_eq(&self.pool, &self.name, field, value)
            .await?
            .into_iter()
            .map(|row| row.into_body())
            .collect()
    }

    async fn list(&self, limit: usize) -> Result<Vec<JsonMap>> {
        self.lifecycle.check(BackendKind::DocSqlite)?;
        DocumentQueries::list(&self.pool, &self.name, limit)
            .await?
            .into_iter()
            .map(|row| row.into_body())
            .collect()
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        self.lifecycle.check(BackendKind::DocSqlite)?;
        DocumentQueries::delete(&self.pool, &self.name, id.as_str()).await
    }
}
