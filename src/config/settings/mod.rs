#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::StoreError;
use crate::identifier::{BackendKind, BackendRole};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const CONFIG_DIR_ENV: &str = "RAG_STORE_CONFIG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub document_backend: String,
    pub vector_backend: String,
    pub vector_dimension: u32,
    pub default_collection: String,
    pub sqlite: SqliteConfig,
    pub mongo: MongoConfig,
    pub cosmos: CosmosConfig,
    pub lancedb: LanceConfig,
    pub qdrant: QdrantConfig,
    pub pgvector: PgvectorConfig,
    pub oracle: OracleConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            document_backend: BackendKind::DocSqlite.to_string(),
            vector_backend: BackendKind::VectorLance.to_string(),
            vector_dimension: DEFAULT_EMBEDDING_DIMENSION,
            default_collection: "default".to_string(),
            sqlite: SqliteConfig::default(),
            mongo: MongoConfig::default(),
            cosmos: CosmosConfig::default(),
            lancedb: LanceConfig::default(),
            qdrant: QdrantConfig::default(),
            pgvector: PgvectorConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file; defaults to `metadata.db` in the config directory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 10,
        }
    }
}

/// Mongo-compatible HTTP data API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MongoConfig {
    pub endpoint: String,
    pub data_source: String,
    pub database: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/app/data/endpoint/data/v1/".to_string(),
            data_source: "Cluster0".to_string(),
            database: "rag".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

/// Cosmos-style REST API authenticated with a bearer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CosmosConfig {
    pub endpoint: String,
    pub database: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for CosmosConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost:8081/".to_string(),
            database: "rag".to_string(),
            token: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LanceConfig {
    /// Dataset directory; defaults to `vectors` in the config directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PgvectorConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

impl Default for PgvectorConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost:5432/rag".to_string(),
            max_connections: 10,
            timeout_seconds: 10,
        }
    }
}

/// Oracle REST Data Services endpoint with REST-enabled SQL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub url: String,
    pub schema: String,
    pub username: String,
    pub password: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8181/ords/".to_string(),
            schema: "rag".to_string(),
            username: "rag".to_string(),
            password: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
        }
    }
}

/// Knowledge sources registered at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub file_shares: Vec<FileShareConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileShareConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),
    #[error("Backend {0} cannot be used as the {1} backend")]
    WrongBackendRole(BackendKind, &'static str),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid vector dimension: {0} (must be between 2 and 4096)")]
    InvalidVectorDimension(u32),
    #[error("Invalid pool size: {0} (must be between 1 and 100)")]
    InvalidPoolSize(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("Duplicate source name: {0}")]
    DuplicateSource(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnsupportedBackend(name) => StoreError::UnsupportedBackend(name),
            other => StoreError::Config(other.to_string()),
        }
    }
}

impl Config {
    /// Default configuration rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
        } else {
            Config::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Resolve the configuration directory, honoring `RAG_STORE_CONFIG_DIR`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        dirs::config_dir()
            .map(|dir| dir.join("rag-store"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Secrets are usually injected by the environment rather than the file
    pub fn apply_env_overrides(&mut self) {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = env("RAG_STORE_MONGO_API_KEY") {
            self.storage.mongo.api_key = Some(key);
        }
        if let Some(token) = env("RAG_STORE_COSMOS_TOKEN") {
            self.storage.cosmos.token = Some(token);
        }
        if let Some(key) = env("RAG_STORE_QDRANT_API_KEY") {
            self.storage.qdrant.api_key = Some(key);
        }
        if let Some(url) = env("RAG_STORE_PGVECTOR_URL") {
            self.storage.pgvector.url = url;
        }
        if let Some(password) = env("RAG_STORE_ORACLE_PASSWORD") {
            self.storage.oracle.password = Some(password);
        }
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Path of the SQLite database used for documents and sync state
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .sqlite
            .path
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("metadata.db"))
    }

    /// Path of the LanceDB dataset directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.storage
            .lancedb
            .path
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("vectors"))
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.ollama.validate()?;
        self.sources.validate()?;
        Ok(())
    }
}

impl StorageConfig {
    pub fn document_kind(&self) -> Result<BackendKind, ConfigError> {
        parse_backend(&self.document_backend, BackendRole::Document, "document")
    }

    pub fn vector_kind(&self) -> Result<BackendKind, ConfigError> {
        parse_backend(&self.vector_backend, BackendRole::Vector, "vector")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let document = self.document_kind()?;
        let vector = self.vector_kind()?;

        if !(2..=4096).contains(&self.vector_dimension) {
            return Err(ConfigError::InvalidVectorDimension(self.vector_dimension));
        }

        if self.default_collection.trim().is_empty() {
            return Err(ConfigError::MissingSetting("storage.default_collection"));
        }

        // Only the selected backends need complete connection settings
        match document {
            BackendKind::DocSqlite => validate_pool(self.sqlite.max_connections)?,
            BackendKind::DocMongo => {
                validate_http_url(&self.mongo.endpoint)?;
                validate_timeout(self.mongo.timeout_seconds)?;
                if self.mongo.database.trim().is_empty() {
                    return Err(ConfigError::MissingSetting("storage.mongo.database"));
                }
                if self.mongo.data_source.trim().is_empty() {
                    return Err(ConfigError::MissingSetting("storage.mongo.data_source"));
                }
            }
            BackendKind::DocCosmos => {
                validate_http_url(&self.cosmos.endpoint)?;
                validate_timeout(self.cosmos.timeout_seconds)?;
                if self.cosmos.database.trim().is_empty() {
                    return Err(ConfigError::MissingSetting("storage.cosmos.database"));
                }
            }
            _ => return Err(ConfigError::WrongBackendRole(document, "document")),
        }

        match vector {
            BackendKind::VectorLance => {}
            BackendKind::VectorQdrant => {
                validate_http_url(&self.qdrant.url)?;
                validate_timeout(self.qdrant.timeout_seconds)?;
            }
            BackendKind::VectorPgvector => {
                validate_pool(self.pgvector.max_connections)?;
                validate_timeout(self.pgvector.timeout_seconds)?;
                let url = Url::parse(&self.pgvector.url)
                    .map_err(|_| ConfigError::InvalidUrl(self.pgvector.url.clone()))?;
                if !matches!(url.scheme(), "postgres" | "postgresql") {
                    return Err(ConfigError::InvalidUrl(self.pgvector.url.clone()));
                }
            }
            BackendKind::VectorOracle => {
                validate_http_url(&self.oracle.url)?;
                validate_timeout(self.oracle.timeout_seconds)?;
                if self.oracle.schema.trim().is_empty() {
                    return Err(ConfigError::MissingSetting("storage.oracle.schema"));
                }
                if self.oracle.username.trim().is_empty() {
                    return Err(ConfigError::MissingSetting("storage.oracle.username"));
                }
            }
            _ => return Err(ConfigError::WrongBackendRole(vector, "vector")),
        }

        Ok(())
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl SourcesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for share in &self.file_shares {
            if share.name.trim().is_empty() {
                return Err(ConfigError::MissingSetting("sources.file_shares.name"));
            }
            if !seen.insert(share.name.as_str()) {
                return Err(ConfigError::DuplicateSource(share.name.clone()));
            }
        }
        Ok(())
    }
}

fn parse_backend(
    name: &str,
    role: BackendRole,
    role_name: &'static str,
) -> Result<BackendKind, ConfigError> {
    let kind: BackendKind = name
        .parse()
        .map_err(|_| ConfigError::UnsupportedBackend(name.to_string()))?;
    if kind.role() != role {
        return Err(ConfigError::WrongBackendRole(kind, role_name));
    }
    Ok(kind)
}

fn validate_http_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidProtocol(other.to_string())),
    }
}

fn validate_pool(size: u32) -> Result<(), ConfigError> {
    if (1..=100).contains(&size) {
        Ok(())
    } else {
        Err(ConfigError::InvalidPoolSize(size))
    }
}

fn validate_timeout(seconds: u64) -> Result<(), ConfigError> {
    if (1..=600).contains(&seconds) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimeout(seconds))
    }
}
