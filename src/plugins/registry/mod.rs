
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{DataSource, Plugin, PluginMetadata, PluginType};
use crate::embeddings::Embedder;
use crate::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct RegisteredPlugin {
    pub metadata: PluginMetadata,
    pub plugin: Plugin,
}

/// Plugins keyed by type, in registration order.
///
/// Filled during bootstrap through `&mut self`, then shared behind an `Arc`
/// so lookups need no locking.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: HashMap<PluginType, Vec<RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        plugin_type: PluginType,
        metadata: PluginMetadata,
        plugin: Plugin,
    ) -> Result<()> {
        for actual in [metadata.plugin_type, plugin.plugin_type()] {
            if actual != plugin_type {
                return Err(StoreError::PluginTypeMismatch {
                    name: metadata.name,
                    expected: plugin_type,
                    actual,
                });
            }
        }

        let entries = self.entries.entry(plugin_type).or_default();
        if entries.iter().any(|entry| entry.metadata.name == metadata.name) {
            return Err(StoreError::DuplicatePlugin {
                plugin_type,
                name: metadata.name,
            });
        }

        debug!(
            "Registered {} plugin {} v{}",
            plugin_type, metadata.name, metadata.version
        );
        entries.push(RegisteredPlugin { metadata, plugin });
        Ok(())
    }

    /// All plugins of a type; empty when none were registered
    pub fn lookup(&self, plugin_type: PluginType) -> &[RegisteredPlugin] {
        self.entries
            .get(&plugin_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, plugin_type: PluginType, name: &str) -> Result<&RegisteredPlugin> {
        self.lookup(plugin_type)
            .iter()
            .find(|entry| entry.metadata.name == name)
            .ok_or_else(|| StoreError::PluginNotFound {
                plugin_type,
                name: name.to_string(),
            })
    }

    pub fn knowledge_sources(&self) -> Vec<Arc<dyn DataSource>> {
        self.lookup(PluginType::KnowledgeSource)
            .iter()
            .filter_map(|entry| match &entry.plugin {
                Plugin::KnowledgeSource(source) => Some(Arc::clone(source)),
                Plugin::Embedder(_) => None,
            })
            .collect()
    }

    /// The named knowledge source together with its metadata
    pub fn knowledge_source(&self, name: &str) -> Result<(Arc<dyn DataSource>, &PluginMetadata)> {
        let entry = self.get(PluginType::KnowledgeSource, name)?;
        match &entry.plugin {
            Plugin::KnowledgeSource(source) => Ok((Arc::clone(source), &entry.metadata)),
            Plugin::Embedder(_) => Err(StoreError::PluginTypeMismatch {
                name: name.to_string(),
                expected: PluginType::KnowledgeSource,
                actual: PluginType::Embedder,
            }),
        }
    }

    pub fn embedder(&self, name: &str) -> Result<Arc<dyn Embedder>> {
        let entry = self.get(PluginType::Embedder, name)?;
        match &entry.plugin {
            Plugin::Embedder(embedder) => Ok(Arc::clone(embedder)),
            Plugin::KnowledgeSource(_) => Err(StoreError::PluginTypeMismatch {
                name: name.to_string(),
                expected: PluginType::Embedder,
                actual: PluginType::KnowledgeSource,
            }),
        }
    }
}
