// Incremental sync
// Turns a fresh pass over a knowledge source into document upserts and deletes

pub mod state;


use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::plugins::{DataSource, DataSourceRecord};
use crate::store::{CompositeStore, NewDocument};
use crate::{Result, StoreError};

pub use state::{SqliteSyncState, SyncStateStore};

/// What was written for one source record in an earlier run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedRecord {
    pub document_id: String,
    pub fingerprint: Option<String>,
}

/// Records to (re)write and documents to remove
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalSyncDelta {
    pub record_ids_to_add: BTreeSet<String>,
    pub document_ids_to_delete: BTreeSet<String>,
}

impl IncrementalSyncDelta {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.record_ids_to_add.is_empty() && self.document_ids_to_delete.is_empty()
    }
}

/// Compare the current source state with what was synced before.
///
/// `current` maps each source id to its fingerprint. A record is added when it
/// was never synced, or when `detect_changes` is set and both fingerprints are
/// known and differ. A synced document is deleted when its source id is gone.
pub fn compute_delta(
    current: &HashMap<String, Option<String>>,
    previous: &HashMap<String, SyncedRecord>,
    detect_changes: bool,
) -> IncrementalSyncDelta {
    let record_ids_to_add = current
        .iter()
        .filter(|(source_id, fingerprint)| match previous.get(*source_id) {
            None => true,
            Some(synced) => {
                detect_changes
                    && matches!(
                        (fingerprint, &synced.fingerprint),
                        (Some(now), Some(before)) if now != before
                    )
            }
        })
        .map(|(source_id, _)| source_id.clone())
        .collect();

    let document_ids_to_delete = previous
        .iter()
        .filter(|(source_id, _)| !current.contains_key(*source_id))
        .map(|(_, synced)| synced.document_id.clone())
        .collect();

    IncrementalSyncDelta {
        record_ids_to_add,
        document_ids_to_delete,
    }
}

/// Writes recorded for a source at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Source id to the document now holding it
    pub upserted: BTreeMap<String, SyncedRecord>,
    pub deleted_document_ids: BTreeSet<String>,
}

/// Outcome of one `SyncPipeline::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub source_name: String,
    pub collection: String,
    pub fetched: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub delta: IncrementalSyncDelta,
}

/// Applies deltas from knowledge sources to a composite store
pub struct SyncPipeline {
    store: Arc<CompositeStore>,
    state: Arc<dyn SyncStateStore>,
    embedder: Option<Arc<dyn Embedder>>,
    detect_changes: bool,
}

impl SyncPipeline {
    pub fn new(store: Arc<CompositeStore>, state: Arc<dyn SyncStateStore>) -> Self {
        Self {
            store,
            state,
            embedder: None,
            detect_changes: true,
        }
    }

    /// Embed added records so they become searchable
    #[inline]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[inline]
    pub fn with_change_detection(mut self, enabled: bool) -> Self {
        self.detect_changes = enabled;
        self
    }

    /// Sync every record of `source` into `collection`.
    ///
    /// What was synced before is tracked per source and collection, so one
    /// source can feed several collections independently.
    ///
    /// A source error aborts before anything is written. A write error aborts
    /// the run after recording the writes that did succeed, so a rerun neither
    /// duplicates nor loses documents.
    pub async fn run(&self, source: &dyn DataSource, collection: &str) -> Result<SyncReport> {
        let source_name = source.name().to_string();
        let collection = self.store.resolve(collection).await?.logical_name;

        let records = collect_records(source).await?;
        let previous = self
            .state
            .synced_document_ids(&source_name, &collection)
            .await?;

        let current: HashMap<String, Option<String>> = records
            .iter()
            .map(|(id, record)| (id.clone(), record.fingerprint.clone()))
            .collect();
        let delta = compute_delta(&current, &previous, self.detect_changes);
        info!(
            "Sync delta for {}: {} to add, {} to delete ({} fetched)",
            source_name,
            delta.record_ids_to_add.len(),
            delta.document_ids_to_delete.len(),
            records.len()
        );

        let mut result = SyncResult::default();
        let applied = self
            .apply(&source_name, &collection, &records, &previous, &delta, &mut result)
            .await;

        if let Err(e) = applied {
            warn!("Sync of {} into {} failed part way: {}", source_name, collection, e);
            if let Err(record_error) = self
                .state
                .record_sync_result(&source_name, &collection, &result)
                .await
            {
                warn!("Could not record partial sync of {}: {}", source_name, record_error);
            }
            return Err(e);
        }
        self.state
            .record_sync_result(&source_name, &collection, &result)
            .await?;

        let updated = result
            .upserted
            .keys()
            .filter(|source_id| previous.contains_key(*source_id))
            .count();
        let report = SyncReport {
            source_name,
            collection,
            fetched: records.len(),
            added: result.upserted.len() - updated,
            updated,
            deleted: result.deleted_document_ids.len(),
            delta,
        };
        info!(
            "Synced {}: {} added, {} updated, {} deleted",
            report.source_name, report.added, report.updated, report.deleted
        );
        Ok(report)
    }

    async fn apply(
        &self,
        source_name: &str,
        collection: &str,
        records: &BTreeMap<String, DataSourceRecord>,
        previous: &HashMap<String, SyncedRecord>,
        delta: &IncrementalSyncDelta,
        result: &mut SyncResult,
    ) -> Result<()> {
        let to_add: Vec<&DataSourceRecord> = delta
            .record_ids_to_add
            .iter()
            .filter_map(|source_id| records.get(source_id))
            .collect();
        let mut embeddings = self.embed(&to_add).await?.map(Vec::into_iter);

        for record in to_add {
            let mut document = NewDocument::new(record.content.clone());
            document.id = previous
                .get(&record.source_id)
                .map(|synced| synced.document_id.clone());
            document.metadata = record.metadata.clone();
            document.source_id = Some(record.source_id.clone());
            document.embedding = embeddings.as_mut().and_then(Iterator::next);

            let stored = self.store.upsert_document(collection, document).await?;
            debug!("Synced record {} as document {}", record.source_id, stored.id);
            result.upserted.insert(
                record.source_id.clone(),
                SyncedRecord {
                    document_id: stored.id,
                    fingerprint: record.fingerprint.clone(),
                },
            );
        }

        for document_id in &delta.document_ids_to_delete {
            // A tracked document that is not in the collection stays tracked
            if !self.store.delete_document(collection, document_id).await? {
                return Err(StoreError::SyncedDocumentMissing {
                    source_name: source_name.to_string(),
                    collection: collection.to_string(),
                    document_id: document_id.clone(),
                });
            }
            result.deleted_document_ids.insert(document_id.clone());
        }

        Ok(())
    }

    async fn embed(&self, records: &[&DataSourceRecord]) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        if records.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(StoreError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(Some(vectors))
    }
}

/// Drain the source, keyed by source id. Any error item aborts the fetch.
async fn collect_records(source: &dyn DataSource) -> Result<BTreeMap<String, DataSourceRecord>> {
    let mut records = BTreeMap::new();
    let mut fetched = 0;
    let mut stream = source.get_data();

    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => {
                fetched += 1;
                if let Some(earlier) = records.insert(record.source_id.clone(), record) {
                    warn!(
                        "Source {} returned {} more than once, keeping the last",
                        source.name(),
                        earlier.source_id
                    );
                }
            }
            Err(e) => {
                return Err(StoreError::SourceFetchAborted {
                    source_name: source.name().to_string(),
                    fetched,
                    message: e.to_string(),
                });
            }
        }
    }

    debug!("Fetched {} records from {}", fetched, source.name());
    Ok(records)
}
