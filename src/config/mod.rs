// Configuration management module
// TOML settings for backend selection, connections, embeddings and sources

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, CosmosConfig, FileShareConfig, LanceConfig, MongoConfig, OllamaConfig,
    OracleConfig, PgvectorConfig, QdrantConfig, SourcesConfig, SqliteConfig, StorageConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
