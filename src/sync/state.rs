use async_trait::async_trait;
use std::collections::HashMap;

use super::{SyncResult, SyncedRecord};
use crate::Result;
use crate::database::sqlite::models::SyncRunRow;
use crate::database::sqlite::{Database, SyncStateQueries};

/// Remembers which document each source record was written to
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Source id to synced document for everything `source_name` wrote into `collection`
    async fn synced_document_ids(
        &self,
        source_name: &str,
        collection: &str,
    ) -> Result<HashMap<String, SyncedRecord>>;

    async fn record_sync_result(
        &self,
        source_name: &str,
        collection: &str,
        result: &SyncResult,
    ) -> Result<()>;
}

/// Sync state kept in the local SQLite database
#[derive(Debug, Clone)]
pub struct SqliteSyncState {
    database: Database,
}

impl SqliteSyncState {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Most recent completed run of `source_name` into `collection`
    pub async fn last_run(&self, source_name: &str, collection: &str) -> Result<Option<SyncRunRow>> {
        SyncStateQueries::latest_run(self.database.pool(), source_name, collection).await
    }

    /// Most recent run of `source_name` into each of its collections
    pub async fn last_runs(&self, source_name: &str) -> Result<Vec<SyncRunRow>> {
        SyncStateQueries::latest_runs(self.database.pool(), source_name).await
    }
}

#[async_trait]
impl SyncStateStore for SqliteSyncState {
    async fn synced_document_ids(
        &self,
        source_name: &str,
        collection: &str,
    ) -> Result<HashMap<String, SyncedRecord>> {
        let rows =
            SyncStateQueries::list_for_source(self.database.pool(), source_name, collection).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.record_id,
                    SyncedRecord {
                        document_id: row.document_id,
                        fingerprint: row.fingerprint,
                    },
                )
            })
            .collect())
    }

    async fn record_sync_result(
        &self,
        source_name: &str,
        collection: &str,
        result: &SyncResult,
    ) -> Result<()> {
        let upserts: Vec<(String, String, Option<String>)> = result
            .upserted
            .iter()
            .map(|(record_id, synced)| {
                (
                    record_id.clone(),
                    synced.document_id.clone(),
                    synced.fingerprint.clone(),
                )
            })
            .collect();
        let removed: Vec<String> = result.deleted_document_ids.iter().cloned().collect();

        SyncStateQueries::apply_run(
            self.database.pool(),
            source_name,
            collection,
            &upserts,
            &removed,
        )
        .await
    }
}
