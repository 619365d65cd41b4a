// LanceDB vector backend
// Embedded datasets on local disk, one table per collection

#[cfg(test)]
mod tests;

use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{Lifecycle, NativeHit, VectorBackend, VectorCollection, VectorPoint};
use crate::identifier::{BackendKind, RecordId};
use crate::score::ScoreConvention;
use crate::{Result, StoreError};

const KIND: BackendKind = BackendKind::VectorLance;

/// Vector backend storing each collection as a LanceDB table
#[derive(Clone)]
pub struct LanceVectorStore {
    connection: Connection,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for LanceVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceVectorStore")
            .field("uri", &self.connection.uri())
            .finish()
    }
}

impl LanceVectorStore {
    /// Open (creating if needed) the dataset directory at `path`
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let uri = path.display().to_string();
        debug!("Initializing LanceDB at path: {}", uri);

        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            StoreError::unavailable(KIND.as_str(), e)
        })?;

        info!("Vector store initialized at {}", uri);
        Ok(Self {
            connection,
            lifecycle: Lifecycle::default(),
        })
    }
}

#[async_trait]
impl VectorBackend for LanceVectorStore {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::CosineDistance
    }

    fn collection(&self, name: &str) -> Arc<dyn VectorCollection> {
        Arc::new(LanceTable {
            connection: self.connection.clone(),
            name: name.to_string(),
            lifecycle: self.lifecycle.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing LanceDB vector store");
        }
        Ok(())
    }
}

struct LanceTable {
    connection: Connection,
    name: String,
    lifecycle: Lifecycle,
}

impl LanceTable {
    /// `None` when the table has not been created yet
    async fn open(&self) -> Result<Option<Table>> {
        self.lifecycle.check(KIND)?;
        match self.connection.open_table(&self.name).execute().await {
            Ok(table) => Ok(Some(table)),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(None),
            Err(e) => Err(lance_error("Failed to open table", e)),
        }
    }

    async fn open_existing(&self) -> Result<Table> {
        self.open().await?.ok_or_else(|| StoreError::BackendRejected {
            backend: KIND.to_string(),
            message: format!("table {} does not exist", self.name),
        })
    }
}

#[async_trait]
impl VectorCollection for LanceTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure(&self, dimension: usize) -> Result<()> {
        if self.open().await?.is_some() {
            return Ok(());
        }

        info!("Creating LanceDB table {} ({} dimensions)", self.name, dimension);
        match self
            .connection
            .create_empty_table(&self.name, create_schema(dimension))
            .execute()
            .await
        {
            Ok(_) | Err(lancedb::Error::TableAlreadyExists { .. }) => Ok(()),
            Err(e) => Err(lance_error("Failed to create table", e)),
        }
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            debug!("No points to store");
            return Ok(());
        }

        let table = self.open_existing().await?;
        let record_batch = create_record_batch(points)?;

        // Replace any previous version of these points
        table
            .delete(&id_predicate(points.iter().map(|p| &p.id)))
            .await
            .map_err(|e| lance_error("Failed to replace points", e))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| lance_error("Failed to insert points", e))?;

        debug!("Stored {} points in {}", points.len(), self.name);
        Ok(())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let Some(table) = self.open().await? else {
            return Ok(());
        };

        table
            .delete(&id_predicate(ids.iter()))
            .await
            .map_err(|e| lance_error("Failed to delete points", e))?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<NativeHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(table) = self.open().await? else {
            return Ok(Vec::new());
        };

        let mut results = table
            .vector_search(vector)
            .map_err(|e| lance_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| lance_error("Failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| lance_error("Failed to read result stream", e))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        debug!("Search on {} returned {} hits", self.name, hits.len());
        Ok(hits)
    }
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
    ]))
}

fn create_record_batch(points: &[VectorPoint]) -> Result<RecordBatch> {
    let dimension = points[0].vector.len();
    if let Some(point) = points.iter().find(|p| p.vector.len() != dimension) {
        return Err(StoreError::BackendRejected {
            backend: KIND.to_string(),
            message: format!(
                "point {} has {} dimensions, expected {}",
                point.id,
                point.vector.len(),
                dimension
            ),
        });
    }

    let ids: Vec<&str> = points.iter().map(|p| p.id.as_str()).collect();
    let document_ids: Vec<&str> = points.iter().map(|p| p.document_id.as_str()).collect();
    let flat_values: Vec<f32> = points.iter().flat_map(|p| p.vector.iter().copied()).collect();

    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| lance_error("Failed to create vector array", e))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(document_ids)),
        Arc::new(vector_array),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| lance_error("Failed to create record batch", e))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<NativeHit>> {
    let ids = string_column(batch, "id")?;
    let document_ids = string_column(batch, "document_id")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| lance_error("Search result", "missing _distance column"))?;

    Ok((0..batch.num_rows())
        .map(|row| NativeHit {
            id: ids.value(row).to_string(),
            document_id: document_ids.value(row).to_string(),
            score: f64::from(distances.value(row)),
        })
        .collect())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| lance_error("Search result", format!("missing {} column", name)))
}

/// Ids are canonical UUIDs, so quoting them inline is safe
fn id_predicate<'a>(ids: impl Iterator<Item = &'a RecordId>) -> String {
    let quoted: Vec<String> = ids.map(|id| format!("'{}'", id)).collect();
    format!("id IN ({})", quoted.join(", "))
}

fn lance_error(context: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::BackendRejected {
        backend: KIND.to_string(),
        message: format!("{}: {}", context, error),
    }
}
