// Vector backend for Qdrant over its gRPC API.
// Qdrant reports cosine similarity, higher is closer.


use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct, PointsIdsList,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Lifecycle, NativeHit, VectorBackend, VectorCollection, VectorPoint};
use crate::config::QdrantConfig;
use crate::identifier::{BackendKind, RecordId};
use crate::score::ScoreConvention;
use crate::{Result, StoreError};

const KIND: BackendKind = BackendKind::VectorQdrant;

// gRPC status codes worth retrying: cancelled, unknown, deadline exceeded,
// resource exhausted, aborted, unavailable
const TRANSIENT_CODES: &[i32] = &[1, 2, 4, 8, 10, 14];

#[derive(Clone)]
pub struct QdrantVectorStore {
    client: Arc<Qdrant>,
    lifecycle: Lifecycle,
}

impl QdrantVectorStore {
    /// Connect and check the server answers before handing out collections
    pub async fn new(config: &QdrantConfig) -> Result<Self> {
        let store = Self::build(config)?;
        let reply = store.client.health_check().await.map_err(qdrant_error)?;
        info!("Using Qdrant {} at {}", reply.version, config.url);
        Ok(store)
    }

    /// Client without a round trip; the channel connects on first use
    pub(crate) fn build(config: &QdrantConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StoreError::Config(format!("invalid Qdrant URL {}: {}", config.url, e)))?;

        Ok(Self {
            client: Arc::new(client),
            lifecycle: Lifecycle::default(),
        })
    }
}

impl fmt::Debug for QdrantVectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantVectorStore")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VectorBackend for QdrantVectorStore {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::CosineSimilarity
    }

    fn collection(&self, name: &str) -> Arc<dyn VectorCollection> {
        Arc::new(QdrantCollection {
            client: Arc::clone(&self.client),
            name: name.to_string(),
            lifecycle: self.lifecycle.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing Qdrant vector store");
        }
        Ok(())
    }
}

struct QdrantCollection {
    client: Arc<Qdrant>,
    name: String,
    lifecycle: Lifecycle,
}

#[async_trait]
impl VectorCollection for QdrantCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure(&self, dimension: usize) -> Result<()> {
        self.lifecycle.check(KIND)?;
        let exists = self
            .client
            .collection_exists(self.name.as_str())
            .await
            .map_err(qdrant_error)?;
        if exists {
            return Ok(());
        }

        info!("Creating Qdrant collection {} ({} dimensions)", self.name, dimension);
        let request = CreateCollectionBuilder::new(self.name.as_str())
            .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine));
        match self.client.create_collection(request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Lost a creation race against another writer
                if self
                    .client
                    .collection_exists(self.name.as_str())
                    .await
                    .unwrap_or(false)
                {
                    warn!("Qdrant collection {} already exists", self.name);
                    return Ok(());
                }
                Err(qdrant_error(e))
            }
        }
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        self.lifecycle.check(KIND)?;
        if points.is_empty() {
            return Ok(());
        }

        let points = points
            .iter()
            .map(|point| {
                let payload = Payload::try_from(json!({ "document_id": point.document_id }))
                    .map_err(qdrant_error)?;
                Ok(PointStruct::new(
                    point.id.to_string(),
                    point.vector.clone(),
                    payload,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let count = points.len();

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.name.as_str(), points).wait(true))
            .await
            .map_err(qdrant_error)?;

        debug!("Upserted {} points into {}", count, self.name);
        Ok(())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<()> {
        self.lifecycle.check(KIND)?;
        if ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.to_string())).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(self.name.as_str())
                    .points(PointsIdsList { ids })
                    .wait(true),
            )
            .await
            .map_err(qdrant_error)?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<NativeHit>> {
        self.lifecycle.check(KIND)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let reply = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.name.as_str(), vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(qdrant_error)?;

        Ok(reply.result.iter().filter_map(parse_hit).collect())
    }
}

fn parse_hit(hit: &ScoredPoint) -> Option<NativeHit> {
    let id = match hit.id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(id) => id.clone(),
        PointIdOptions::Num(id) => id.to_string(),
    };
    let document_id = match hit.payload.get("document_id").and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(document_id)) => document_id.clone(),
        _ => {
            warn!("Skipping Qdrant point {} without document_id", id);
            return None;
        }
    };

    Some(NativeHit {
        id,
        document_id,
        score: f64::from(hit.score),
    })
}

fn qdrant_error(err: QdrantError) -> StoreError {
    match &err {
        QdrantError::ResponseError { status } => {
            grpc_status_error(status.code() as i32, status.message())
        }
        _ => StoreError::BackendRejected {
            backend: KIND.to_string(),
            message: err.to_string(),
        },
    }
}

fn grpc_status_error(code: i32, message: &str) -> StoreError {
    let message = format!("gRPC {}: {}", code, message);
    if TRANSIENT_CODES.contains(&code) {
        StoreError::unavailable(KIND.as_str(), message)
    } else {
        StoreError::BackendRejected {
            backend: KIND.to_string(),
            message,
        }
    }
}
