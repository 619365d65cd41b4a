// Collection resolver
// Maps logical collection names to backend collections, creating them on first use

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::database::{DocumentBackend, JsonMap, VectorBackend};
use crate::identifier::{RecordId, normalize};
use crate::{Result, StoreError};

/// Document collection holding one metadata record per logical collection
pub const COLLECTIONS: &str = "collections";
pub const DEFAULT_COLLECTION_TYPE: &str = "generic";

/// A resolved logical collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CollectionRef {
    pub logical_name: String,
    /// Id of the metadata record in the document backend
    pub id: RecordId,
}

impl CollectionRef {
    /// Name of the backing collection in the vector backend
    pub fn vector_collection(&self) -> String {
        format!("c_{}", self.id)
    }
}

/// Persisted attributes of a logical collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-provided attributes for an explicit create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCollection {
    pub name: String,
    pub kind: Option<String>,
    pub description: Option<String>,
}

impl NewCollection {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Resolved {
    reference: CollectionRef,
    info: CollectionInfo,
}

type Slot = Arc<OnceCell<Resolved>>;

/// Resolves logical names with at most one create per name per process.
///
/// Each name owns a slot initialized at most once; concurrent callers for the
/// same name wait on that slot while other names proceed independently. A
/// failed initialization leaves the slot empty so a later call retries.
pub struct CollectionResolver {
    documents: Arc<dyn DocumentBackend>,
    vectors: Arc<dyn VectorBackend>,
    dimension: usize,
    slots: RwLock<HashMap<String, Slot>>,
}

impl CollectionResolver {
    pub fn new(
        documents: Arc<dyn DocumentBackend>,
        vectors: Arc<dyn VectorBackend>,
        dimension: usize,
    ) -> Self {
        Self {
            documents,
            vectors,
            dimension,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `logical_name`, creating the collection with default attributes on a miss
    pub async fn resolve(&self, logical_name: &str) -> Result<CollectionRef> {
        let request = NewCollection::named(logical_name);
        Ok(self.resolve_with(&request).await?.reference)
    }

    /// Create a collection with explicit attributes.
    ///
    /// An existing collection with the same logical name is returned unchanged.
    pub async fn create(&self, request: &NewCollection) -> Result<CollectionInfo> {
        Ok(self.resolve_with(request).await?.info)
    }

    /// Every persisted collection, ordered by logical name
    pub async fn list(&self, limit: usize) -> Result<Vec<CollectionInfo>> {
        let records = self.documents.collection(COLLECTIONS).list(limit).await?;
        let mut collections = records
            .into_iter()
            .map(parse_info)
            .collect::<Result<Vec<_>>>()?;
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    /// Refs resolved so far by this process
    pub async fn cached(&self) -> Vec<CollectionRef> {
        let slots = self.slots.read().await;
        let mut refs: Vec<CollectionRef> = slots
            .values()
            .filter_map(|slot| slot.get().map(|r| r.reference.clone()))
            .collect();
        refs.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        refs
    }

    async fn resolve_with(&self, request: &NewCollection) -> Result<Resolved> {
        let name = validate_name(&request.name)?;
        let slot = self.slot(&name).await;

        let resolved = slot
            .get_or_try_init(|| self.load_or_create(&name, request))
            .await?;
        Ok(resolved.clone())
    }

    async fn slot(&self, name: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(name) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    async fn load_or_create(&self, name: &str, request: &NewCollection) -> Result<Resolved> {
        let metadata = self.documents.collection(COLLECTIONS);

        let existing = metadata.find_eq("name", name).await?;
        if existing.len() > 1 {
            warn!("Found {} collections named {}, using the first", existing.len(), name);
        }
        if let Some(record) = existing.into_iter().next() {
            let info = parse_info(record)?;
            let id = normalize(&info.id, self.documents.kind())?;
            debug!("Resolved existing collection {} -> {}", name, id);
            return Ok(Resolved {
                reference: CollectionRef {
                    logical_name: name.to_string(),
                    id,
                },
                info,
            });
        }

        let id = RecordId::generate(self.documents.kind().id_format());
        let reference = CollectionRef {
            logical_name: name.to_string(),
            id,
        };

        // Vector side first so a persisted record always has its vectors
        self.vectors
            .collection(&reference.vector_collection())
            .ensure(self.dimension)
            .await?;

        let now = Utc::now();
        let info = CollectionInfo {
            id: reference.id.to_string(),
            name: name.to_string(),
            display_name: capitalize(name),
            kind: request
                .kind
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION_TYPE.to_string()),
            description: request.description.clone(),
            created_at: now,
            updated_at: now,
        };
        metadata.upsert(&reference.id, &to_body(&info)?).await?;

        info!("Created collection {} ({})", name, reference.id);
        Ok(Resolved { reference, info })
    }
}

fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidCollectionName(raw.to_string()));
    }
    Ok(name.to_string())
}

/// Uppercase the first character, leaving the rest untouched
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn to_body(info: &CollectionInfo) -> Result<JsonMap> {
    match serde_json::to_value(info)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        _ => Ok(JsonMap::new()),
    }
}

fn parse_info(record: JsonMap) -> Result<CollectionInfo> {
    Ok(serde_json::from_value(Value::Object(record))?)
}
