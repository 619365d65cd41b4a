// Data source plugin contract
// Knowledge sources and embedders registered by type at bootstrap

pub mod file_share;
pub mod registry;


use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::Result;
use crate::config::Config;
use crate::database::JsonMap;
use crate::embeddings::Embedder;

pub use file_share::FileShareSource;
pub use registry::{PluginRegistry, RegisteredPlugin};

/// The canonical unit a knowledge source emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceRecord {
    /// Stable identifier of the record in the external system
    pub source_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: JsonMap,
    /// Content hash or modification stamp, when the source can provide one
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl DataSourceRecord {
    pub fn new(source_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            content: content.into(),
            metadata: JsonMap::new(),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// A connector to an external knowledge system.
///
/// Every `get_data` call fetches afresh. A failure part way through is
/// yielded as an `Err` item; callers must not compute a delta from a stream
/// that ended in an error.
pub trait DataSource: Send + Sync {
    /// Stable name, unique among registered knowledge sources
    fn name(&self) -> &str;

    fn get_data(&self) -> BoxStream<'_, Result<DataSourceRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    KnowledgeSource,
    Embedder,
}

impl fmt::Display for PluginType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PluginType::KnowledgeSource => write!(f, "knowledge_source"),
            PluginType::Embedder => write!(f, "embedder"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// Records carry fingerprints, so changed records can be re-synced
    pub change_detection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub plugin_type: PluginType,
    #[serde(default)]
    pub capabilities: PluginCapabilities,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>, plugin_type: PluginType) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            plugin_type,
            capabilities: PluginCapabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: PluginCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// A registered plugin instance
#[derive(Clone)]
pub enum Plugin {
    KnowledgeSource(Arc<dyn DataSource>),
    Embedder(Arc<dyn Embedder>),
}

impl Plugin {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Plugin::KnowledgeSource(_) => PluginType::KnowledgeSource,
            Plugin::Embedder(_) => PluginType::Embedder,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plugin::KnowledgeSource(source) => {
                f.debug_tuple("KnowledgeSource").field(&source.name()).finish()
            }
            Plugin::Embedder(embedder) => f
                .debug_tuple("Embedder")
                .field(&embedder.dimension())
                .finish(),
        }
    }
}

/// Register the knowledge sources declared in configuration plus `embedder`
pub fn registry_from_config(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();

    for share in &config.sources.file_shares {
        let source = FileShareSource::new(&share.name, &share.root, share.extensions.clone());
        registry.register(
            PluginType::KnowledgeSource,
            source.metadata(),
            Plugin::KnowledgeSource(Arc::new(source)),
        )?;
    }

    registry.register(
        PluginType::Embedder,
        PluginMetadata::new(
            config.ollama.model.clone(),
            env!("CARGO_PKG_VERSION"),
            PluginType::Embedder,
        ),
        Plugin::Embedder(embedder),
    )?;

    info!(
        "Registered {} knowledge sources",
        registry.lookup(PluginType::KnowledgeSource).len()
    );
    Ok(registry)
}
