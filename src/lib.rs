use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid identifier for {format} backend: {raw:?}")]
    InvalidIdentifier {
        format: identifier::IdFormat,
        raw: String,
    },

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("Backend rejected request ({backend}): {message}")]
    BackendRejected { backend: String, message: String },

    #[error("Plugin already registered: {plugin_type}/{name}")]
    DuplicatePlugin {
        plugin_type: plugins::PluginType,
        name: String,
    },

    #[error("Plugin not found: {plugin_type}/{name}")]
    PluginNotFound {
        plugin_type: plugins::PluginType,
        name: String,
    },

    #[error("Plugin {name} is a {actual} plugin, cannot register it as {expected}")]
    PluginTypeMismatch {
        name: String,
        expected: plugins::PluginType,
        actual: plugins::PluginType,
    },

    #[error("Source fetch aborted for {source_name} after {fetched} records: {message}")]
    SourceFetchAborted {
        source_name: String,
        fetched: usize,
        message: String,
    },

    #[error("Invalid score: {0}")]
    InvalidScore(f64),

    #[error("Invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("Document {document_id} belongs to another collection than {collection}")]
    DocumentInOtherCollection {
        document_id: String,
        collection: String,
    },

    #[error("Document {document_id} synced from {source_name} is missing from {collection}")]
    SyncedDocumentMissing {
        source_name: String,
        collection: String,
        document_id: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn unavailable(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

pub mod collections;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod identifier;
pub mod plugins;
pub mod score;
pub mod store;
pub mod sync;
