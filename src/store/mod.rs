// Composite store
// One document backend and one vector backend behind a single domain interface


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collections::{CollectionInfo, CollectionRef, CollectionResolver, NewCollection};
use crate::config::Config;
use crate::database::{
    DocumentBackend, JsonMap, VectorBackend, VectorCollection, VectorPoint,
    connect_document_backend, connect_vector_backend,
};
use crate::identifier::{RecordId, normalize};
use crate::score::{DistanceScore, to_distance};
use crate::{Result, StoreError};

/// Document collection holding the documents of every logical collection
pub const DOCUMENTS: &str = "documents";

/// A document as persisted by the document backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: JsonMap,
    /// Id of the record this document was synced from
    #[serde(default)]
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to `CompositeStore::upsert_document`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDocument {
    /// Existing document id to replace; a fresh id is generated when `None`
    pub id: Option<String>,
    pub content: String,
    pub metadata: JsonMap,
    pub source_id: Option<String>,
    /// Written to the vector backend when present
    pub embedding: Option<Vec<f32>>,
}

impl NewDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A document matched by a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub document: Document,
    pub distance: DistanceScore,
}

/// Routes domain operations to the configured backends.
///
/// Document ids are normalized against the document backend on the way in.
/// Vector point ids are derived from document ids, so the two backends never
/// see each other's identifier format.
pub struct CompositeStore {
    documents: Arc<dyn DocumentBackend>,
    vectors: Arc<dyn VectorBackend>,
    resolver: CollectionResolver,
    dimension: usize,
}

impl CompositeStore {
    /// Connect both backends selected in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        let documents = connect_document_backend(config).await?;
        let vectors = connect_vector_backend(config).await?;
        let dimension = config.storage.vector_dimension as usize;

        info!(
            "Composite store ready: {} + {} ({} dimensions)",
            documents.kind(),
            vectors.kind(),
            dimension
        );
        Ok(Self::new(documents, vectors, dimension))
    }

    pub fn new(
        documents: Arc<dyn DocumentBackend>,
        vectors: Arc<dyn VectorBackend>,
        dimension: usize,
    ) -> Self {
        let resolver =
            CollectionResolver::new(Arc::clone(&documents), Arc::clone(&vectors), dimension);
        Self {
            documents,
            vectors,
            resolver,
            dimension,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn create_collection(&self, request: &NewCollection) -> Result<CollectionInfo> {
        self.resolver.create(request).await
    }

    pub async fn list_collections(&self, limit: usize) -> Result<Vec<CollectionInfo>> {
        self.resolver.list(limit).await
    }

    pub async fn resolve(&self, logical_name: &str) -> Result<CollectionRef> {
        self.resolver.resolve(logical_name).await
    }

    /// Write a document, and its vector when an embedding is supplied
    ///
    /// An id already owned by another collection is rejected before anything is written.
    pub async fn upsert_document(&self, collection: &str, document: NewDocument) -> Result<Document> {
        let collection = self.resolve(collection).await?;
        if let Some(embedding) = &document.embedding {
            self.check_dimension(embedding)?;
        }

        let id = match &document.id {
            Some(raw) => normalize(raw, self.documents.kind())?,
            None => RecordId::generate(self.documents.kind().id_format()),
        };

        let store = self.documents.collection(DOCUMENTS);
        let now = Utc::now();
        let created_at = match store.get(&id).await? {
            Some(existing) => {
                let existing = parse_document(existing)?;
                if existing.collection_id != collection.id.as_str() {
                    return Err(StoreError::DocumentInOtherCollection {
                        document_id: id.to_string(),
                        collection: collection.logical_name.clone(),
                    });
                }
                existing.created_at
            }
            None => now,
        };

        let stored = Document {
            id: id.to_string(),
            collection_id: collection.id.to_string(),
            content: document.content,
            metadata: document.metadata,
            source_id: document.source_id,
            created_at,
            updated_at: now,
        };
        store.upsert(&id, &to_body(&stored)?).await?;

        if let Some(embedding) = document.embedding {
            let point = VectorPoint {
                id: self.point_id(&id)?,
                document_id: stored.id.clone(),
                vector: embedding,
            };
            self.vector_collection(&collection).upsert(&[point]).await?;
        }

        debug!("Upserted document {} into {}", stored.id, collection.logical_name);
        Ok(stored)
    }

    /// Fetch a document, `None` when it is missing or belongs to another collection
    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collection = self.resolve(collection).await?;
        let id = normalize(id, self.documents.kind())?;
        self.load_document(&collection, &id).await
    }

    /// Remove a document and its vector. Returns whether the document existed.
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let collection = self.resolve(collection).await?;
        let id = normalize(id, self.documents.kind())?;

        if self.load_document(&collection, &id).await?.is_none() {
            debug!("Document {} not in {}, nothing to delete", id, collection.logical_name);
            return Ok(false);
        }

        // Vector first so a retry after a partial failure still finds the document
        self.vector_collection(&collection)
            .delete(&[self.point_id(&id)?])
            .await?;
        let removed = self.documents.collection(DOCUMENTS).delete(&id).await?;

        debug!("Deleted document {} from {}", id, collection.logical_name);
        Ok(removed)
    }

    /// Nearest documents to `vector`, closest first
    pub async fn similarity_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let collection = self.resolve(collection).await?;
        self.check_dimension(vector)?;

        let convention = self.vectors.score_convention();
        let native = self.vector_collection(&collection).search(vector, limit).await?;

        let mut hits = Vec::with_capacity(native.len());
        for hit in native {
            let id = match normalize(&hit.document_id, self.documents.kind()) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping vector {} with unusable document id: {}", hit.id, e);
                    continue;
                }
            };
            let Some(document) = self.load_document(&collection, &id).await? else {
                warn!("Skipping vector {} for missing document {}", hit.id, id);
                continue;
            };
            hits.push(SearchHit {
                document,
                distance: to_distance(hit.score, convention)?,
            });
        }

        hits.sort_by(|a, b| a.distance.cmp(&b.distance));
        Ok(hits)
    }

    /// Close both backends, reporting the first failure
    pub async fn close(&self) -> Result<()> {
        let documents = self.documents.close().await;
        let vectors = self.vectors.close().await;
        documents?;
        vectors
    }

    async fn load_document(
        &self,
        collection: &CollectionRef,
        id: &RecordId,
    ) -> Result<Option<Document>> {
        let Some(body) = self.documents.collection(DOCUMENTS).get(id).await? else {
            return Ok(None);
        };
        let document = parse_document(body)?;
        if document.collection_id != collection.id.as_str() {
            return Ok(None);
        }
        Ok(Some(document))
    }

    fn vector_collection(&self, collection: &CollectionRef) -> Arc<dyn VectorCollection> {
        self.vectors.collection(&collection.vector_collection())
    }

    fn point_id(&self, document_id: &RecordId) -> Result<RecordId> {
        let format = self.vectors.kind().id_format();
        RecordId::derive(format, document_id.as_str()).ok_or_else(|| {
            StoreError::UnsupportedBackend(format!(
                "{} cannot hold derived point ids",
                self.vectors.kind()
            ))
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::Embedding(format!(
                "vector has {} dimensions, store expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

fn to_body(document: &Document) -> Result<JsonMap> {
    match serde_json::to_value(document)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        _ => Ok(JsonMap::new()),
    }
}

fn parse_document(body: JsonMap) -> Result<Document> {
    Ok(serde_json::from_value(Value::Object(body))?)
}
