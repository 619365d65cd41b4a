use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{Config, ConfigError, OllamaConfig, StorageConfig};
use crate::identifier::{BackendKind, BackendRole};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 rag-store Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Storage Backends").bold().yellow());
    eprintln!("Choose the document and vector databases used by every service.");
    eprintln!();

    configure_storage(&mut config.storage)?;

    eprintln!();
    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    configure_ollama(&mut config.ollama)?;

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    let storage = &config.storage;
    eprintln!("{}", style("Storage:").bold().yellow());
    eprintln!("  Document backend: {}", style(&storage.document_backend).cyan());
    eprintln!("  Vector backend: {}", style(&storage.vector_backend).cyan());
    eprintln!("  Vector dimension: {}", style(storage.vector_dimension).cyan());
    eprintln!(
        "  Default collection: {}",
        style(&storage.default_collection).cyan()
    );

    if let Ok(kind) = storage.document_kind() {
        eprintln!("  {}", describe_backend(config, kind));
    }
    if let Ok(kind) = storage.vector_kind() {
        eprintln!("  {}", describe_backend(config, kind));
    }

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());

    eprintln!();
    eprintln!("{}", style("Sources:").bold().yellow());
    if config.sources.file_shares.is_empty() {
        eprintln!("  {}", style("none configured").dim());
    }
    for share in &config.sources.file_shares {
        eprintln!(
            "  {} → {}",
            style(&share.name).cyan(),
            share.root.display()
        );
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// One-line connection summary; secrets are never printed
fn describe_backend(config: &Config, kind: BackendKind) -> String {
    let storage = &config.storage;
    match kind {
        BackendKind::DocSqlite => format!("SQLite file: {}", config.database_path().display()),
        BackendKind::DocMongo => format!(
            "Mongo data API: {} ({}/{}, api key {})",
            storage.mongo.endpoint,
            storage.mongo.data_source,
            storage.mongo.database,
            secret_state(storage.mongo.api_key.as_deref())
        ),
        BackendKind::DocCosmos => format!(
            "Cosmos endpoint: {} (database {}, token {})",
            storage.cosmos.endpoint,
            storage.cosmos.database,
            secret_state(storage.cosmos.token.as_deref())
        ),
        BackendKind::VectorLance => {
            format!("LanceDB path: {}", config.vector_database_path().display())
        }
        BackendKind::VectorQdrant => format!(
            "Qdrant URL: {} (api key {})",
            storage.qdrant.url,
            secret_state(storage.qdrant.api_key.as_deref())
        ),
        BackendKind::VectorPgvector => format!("pgvector pool size: {}", storage.pgvector.max_connections),
        BackendKind::VectorOracle => format!(
            "Oracle ORDS: {} (schema {}, user {}, password {})",
            storage.oracle.url,
            storage.oracle.schema,
            storage.oracle.username,
            secret_state(storage.oracle.password.as_deref())
        ),
    }
}

fn secret_state(secret: Option<&str>) -> &'static str {
    if secret.is_some() { "set" } else { "not set" }
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Config::with_base_dir(config_dir)
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn choose_backend(prompt: &str, role: BackendRole, current: &str) -> Result<BackendKind> {
    let kinds: Vec<BackendKind> = BackendKind::ALL
        .into_iter()
        .filter(|kind| kind.role() == role)
        .collect();
    let labels: Vec<&str> = kinds.iter().map(|kind| kind.as_str()).collect();
    let default_index = labels.iter().position(|&l| l == current).unwrap_or(0);

    let index = Select::new()
        .with_prompt(prompt)
        .default(default_index)
        .items(&labels)
        .interact()?;

    Ok(kinds[index])
}

fn configure_storage(storage: &mut StorageConfig) -> Result<()> {
    let document = choose_backend(
        "Document backend",
        BackendRole::Document,
        &storage.document_backend,
    )?;
    let vector = choose_backend("Vector backend", BackendRole::Vector, &storage.vector_backend)?;
    storage.document_backend = document.to_string();
    storage.vector_backend = vector.to_string();

    storage.vector_dimension = Input::new()
        .with_prompt("Embedding dimension")
        .default(storage.vector_dimension)
        .validate_with(|input: &u32| -> Result<(), ConfigError> {
            if (2..=4096).contains(input) {
                Ok(())
            } else {
                Err(ConfigError::InvalidVectorDimension(*input))
            }
        })
        .interact_text()?;

    match document {
        BackendKind::DocMongo => {
            storage.mongo.endpoint = prompt_text("Mongo data API endpoint", &storage.mongo.endpoint)?;
            storage.mongo.data_source = prompt_text("Data source", &storage.mongo.data_source)?;
            storage.mongo.database = prompt_text("Database", &storage.mongo.database)?;
        }
        BackendKind::DocCosmos => {
            storage.cosmos.endpoint = prompt_text("Cosmos endpoint", &storage.cosmos.endpoint)?;
            storage.cosmos.database = prompt_text("Database", &storage.cosmos.database)?;
        }
        _ => {}
    }

    match vector {
        BackendKind::VectorQdrant => {
            storage.qdrant.url = prompt_text("Qdrant URL", &storage.qdrant.url)?;
        }
        BackendKind::VectorPgvector => {
            storage.pgvector.url = prompt_text("Postgres URL", &storage.pgvector.url)?;
        }
        BackendKind::VectorOracle => {
            storage.oracle.url = prompt_text("ORDS base URL", &storage.oracle.url)?;
            storage.oracle.schema = prompt_text("Schema alias", &storage.oracle.schema)?;
            storage.oracle.username = prompt_text("Username", &storage.oracle.username)?;
        }
        _ => {}
    }

    eprintln!(
        "{}",
        style("Secrets are read from RAG_STORE_* environment variables.").dim()
    );

    storage.validate()?;
    Ok(())
}

fn prompt_text(prompt: &str, current: &str) -> Result<String> {
    let value: String = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Value cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(value)
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let mut candidate = ollama.clone();
    candidate.protocol = protocols[protocol_index].to_string();
    candidate.host = prompt_text("Ollama host", &ollama.host)?;
    candidate.port = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    candidate.model = prompt_text("Embedding model", &ollama.model)?;
    candidate.batch_size = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .interact_text()?;

    candidate.validate()?;
    *ollama = candidate;
    Ok(())
}
