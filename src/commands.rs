use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::StoreError;
use crate::collections::NewCollection;
use crate::config::Config;
use crate::database::sqlite::Database;
use crate::embeddings::{Embedder, OllamaClient};
use crate::plugins::{PluginRegistry, PluginType, registry_from_config};
use crate::store::CompositeStore;
use crate::sync::{SqliteSyncState, SyncPipeline};

const LIST_LIMIT: usize = 1000;

/// Load and validate the configuration stored in `config_dir`
#[inline]
pub fn load_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))
}

/// List every logical collection
#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let store = connect_store(config).await?;
    let outcome = store.list_collections(LIST_LIMIT).await;
    let collections = close_after(&store, outcome).await?;

    if collections.is_empty() {
        println!("No collections have been created yet.");
        println!("Use 'rag-store collections create <name>' or run a sync.");
        return Ok(());
    }

    println!("Collections ({} total):", collections.len());
    println!();
    for collection in &collections {
        println!("{} (ID: {})", style(&collection.display_name).bold(), collection.id);
        println!("   Name: {}", collection.name);
        println!("   Type: {}", collection.kind);
        if let Some(description) = &collection.description {
            println!("   Description: {}", description);
        }
        println!(
            "   Created: {}",
            collection.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// Create a collection, or show the existing one with the same name
#[inline]
pub async fn create_collection(
    config: &Config,
    name: String,
    kind: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let store = connect_store(config).await?;
    let outcome = store
        .create_collection(&NewCollection {
            name,
            kind,
            description,
        })
        .await;
    let info = close_after(&store, outcome).await?;

    println!("Collection: {} (ID: {})", info.display_name, info.id);
    println!("Type: {}", info.kind);
    Ok(())
}

/// List registered knowledge sources and their last sync
#[inline]
pub async fn list_sources(config: &Config) -> Result<()> {
    let registry = build_registry(config)?;
    let sources = registry.lookup(PluginType::KnowledgeSource);

    if sources.is_empty() {
        println!("No knowledge sources are configured.");
        println!("Add a [[sources.file_shares]] entry to the configuration file.");
        return Ok(());
    }

    let state = open_sync_state(config).await?;
    println!("Knowledge Sources ({} total):", sources.len());
    println!();
    for entry in sources {
        let metadata = &entry.metadata;
        println!("{} v{}", style(&metadata.name).bold(), metadata.version);
        println!(
            "   Change detection: {}",
            if metadata.capabilities.change_detection {
                "yes"
            } else {
                "no"
            }
        );
        match state.last_runs(&metadata.name).await {
            Ok(runs) if runs.is_empty() => println!("   Last sync: never"),
            Ok(runs) => {
                for run in runs {
                    println!(
                        "   Last sync into {}: {} ({} written, {} deleted)",
                        run.collection,
                        run.finished_date.format("%Y-%m-%d %H:%M:%S"),
                        run.added,
                        run.deleted
                    );
                }
            }
            Err(e) => println!("   Last sync: Error - {}", e),
        }
        println!();
    }

    Ok(())
}

/// Run an incremental sync of one knowledge source
#[inline]
pub async fn sync_source(config: &Config, source_name: &str, collection: Option<String>) -> Result<()> {
    let embedder = build_embedder(config)?;
    if let Err(e) = embedder.health_check() {
        warn!("Ollama health check failed: {:#}", e);
    }

    let registry = build_registry_with(config, Arc::clone(&embedder) as Arc<dyn Embedder>)?;
    let (source, metadata) = registry.knowledge_source(source_name)?;
    let collection = collection.unwrap_or_else(|| config.storage.default_collection.clone());

    let store = Arc::new(connect_store(config).await?);
    let state = Arc::new(open_sync_state(config).await?);
    let pipeline = SyncPipeline::new(Arc::clone(&store), state)
        .with_embedder(embedder)
        .with_change_detection(metadata.capabilities.change_detection);

    info!("Syncing {} into {}", source_name, collection);
    let bar = spinner(format!("Syncing {} into {}", source_name, collection));
    let outcome = pipeline.run(source.as_ref(), &collection).await;
    bar.finish_and_clear();

    let report = close_after(&store, outcome).await?;
    println!("Sync of {} into {} completed", report.source_name, report.collection);
    println!("  Records fetched: {}", report.fetched);
    println!("  Added: {}", report.added);
    println!("  Updated: {}", report.updated);
    println!("  Deleted: {}", report.deleted);
    Ok(())
}

/// Embed `query` and print the closest documents of `collection`
#[inline]
pub async fn search(config: &Config, collection: &str, query: &str, limit: usize) -> Result<()> {
    let embedder = build_embedder(config)?;
    let vectors = embedder.embed(&[query.to_string()]).await?;
    let vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Embedder returned no vector for the query"))?;

    let store = connect_store(config).await?;
    let outcome = store.similarity_search(collection, &vector, limit).await;
    let hits = close_after(&store, outcome).await?;

    if hits.is_empty() {
        println!("No matching documents in {}.", collection);
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let title = hit
            .document
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .or(hit.document.source_id.as_deref())
            .unwrap_or(&hit.document.id);
        println!(
            "{}. {} (distance {})",
            rank + 1,
            style(title).bold(),
            hit.distance
        );
        println!("   {}", preview(&hit.document.content, 160));
    }
    Ok(())
}

/// Render a failure for operators.
///
/// Source outages and storage outages are reported differently so the two
/// can be told apart at a glance.
#[inline]
pub fn describe_failure(error: &anyhow::Error) -> String {
    match error.downcast_ref::<StoreError>() {
        Some(StoreError::SourceFetchAborted {
            source_name,
            fetched,
            message,
        }) => format!(
            "{} {} stopped after {} records: {}\nNothing was written; rerun the sync once the source recovers.",
            style("Source failure:").yellow().bold(),
            source_name,
            fetched,
            message
        ),
        Some(StoreError::BackendUnavailable { backend, message }) => format!(
            "{} {} is unreachable: {}\nRerunning is safe; the sync resumes from recorded state.",
            style("Storage failure:").red().bold(),
            backend,
            message
        ),
        _ => format!("{} {:#}", style("Error:").red().bold(), error),
    }
}

async fn connect_store(config: &Config) -> Result<CompositeStore> {
    CompositeStore::connect(config)
        .await
        .context("Failed to connect storage backends")
}

/// Close `store` whatever `outcome` is, then report the outcome first
async fn close_after<T>(store: &CompositeStore, outcome: crate::Result<T>) -> Result<T> {
    let closed = store.close().await;
    let value = outcome?;
    closed.context("Failed to close storage backends")?;
    Ok(value)
}

async fn open_sync_state(config: &Config) -> Result<SqliteSyncState> {
    std::fs::create_dir_all(config.get_base_dir()).with_context(|| {
        format!(
            "Failed to create config directory: {}",
            config.get_base_dir().display()
        )
    })?;
    let database = Database::new(config.database_path(), config.storage.sqlite.max_connections)
        .await
        .context("Failed to open sync state database")?;
    Ok(SqliteSyncState::new(database))
}

fn build_embedder(config: &Config) -> Result<Arc<OllamaClient>> {
    let client = OllamaClient::new(&config.ollama, config.storage.vector_dimension as usize)
        .context("Failed to create Ollama client")?;
    Ok(Arc::new(client))
}

fn build_registry(config: &Config) -> Result<PluginRegistry> {
    let embedder = build_embedder(config)?;
    build_registry_with(config, embedder)
}

fn build_registry_with(config: &Config, embedder: Arc<dyn Embedder>) -> Result<PluginRegistry> {
    registry_from_config(config, embedder).context("Failed to register plugins")
}

fn spinner(message: String) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner().with_style(style).with_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
