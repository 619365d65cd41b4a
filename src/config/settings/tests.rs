use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.storage.document_backend, "doc_sqlite");
    assert_eq!(config.storage.vector_backend, "vector_lance");
    assert_eq!(config.storage.vector_dimension, DEFAULT_EMBEDDING_DIMENSION);
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert!(config.sources.file_shares.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn backend_kinds_are_parsed_with_roles() {
    let mut storage = StorageConfig::default();
    assert_eq!(
        storage.document_kind().expect("default document kind"),
        BackendKind::DocSqlite
    );
    assert_eq!(
        storage.vector_kind().expect("default vector kind"),
        BackendKind::VectorLance
    );

    storage.vector_backend = "doc_mongo".to_string();
    assert!(matches!(
        storage.vector_kind(),
        Err(ConfigError::WrongBackendRole(BackendKind::DocMongo, "vector"))
    ));

    storage.document_backend = "couchdb".to_string();
    assert!(matches!(
        storage.document_kind(),
        Err(ConfigError::UnsupportedBackend(name)) if name == "couchdb"
    ));
}

#[test]
fn unsupported_backend_maps_to_store_error() {
    let mut config = Config::default();
    config.storage.document_backend = "couchdb".to_string();
    let err: StoreError = config.validate().expect_err("should fail").into();
    assert!(matches!(err, StoreError::UnsupportedBackend(name) if name == "couchdb"));
}

#[test]
fn storage_validation() {
    let config = Config::default();

    let mut invalid = config.clone();
    invalid.storage.vector_dimension = 1;
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidVectorDimension(1))
    ));

    let mut invalid = config.clone();
    invalid.storage.default_collection = "  ".to_string();
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.storage.sqlite.max_connections = 0;
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidPoolSize(0))));

    let mut qdrant = config.clone();
    qdrant.storage.vector_backend = "vector_qdrant".to_string();
    assert!(qdrant.validate().is_ok());
    qdrant.storage.qdrant.url = "ftp://qdrant:6334".to_string();
    assert!(matches!(qdrant.validate(), Err(ConfigError::InvalidProtocol(_))));

    let mut pg = config.clone();
    pg.storage.vector_backend = "vector_pgvector".to_string();
    assert!(pg.validate().is_ok());
    pg.storage.pgvector.url = "mysql://localhost/rag".to_string();
    assert!(matches!(pg.validate(), Err(ConfigError::InvalidUrl(_))));

    let mut mongo = config;
    mongo.storage.document_backend = "doc_mongo".to_string();
    assert!(mongo.validate().is_ok());
    mongo.storage.mongo.timeout_seconds = 0;
    assert!(matches!(mongo.validate(), Err(ConfigError::InvalidTimeout(0))));
}

#[test]
fn unused_backend_sections_are_not_validated() {
    let mut config = Config::default();
    config.storage.oracle.url = "not a url".to_string();
    config.storage.cosmos.database = String::new();
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn duplicate_source_names_are_rejected() {
    let mut config = Config::default();
    let share = FileShareConfig {
        name: "handbook".to_string(),
        root: PathBuf::from("/srv/handbook"),
        extensions: vec!["md".to_string()],
    };
    config.sources.file_shares = vec![share.clone(), share];
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DuplicateSource(name)) if name == "handbook"
    ));
}

#[test]
fn toml_serialization() {
    let mut config = Config::default();
    config.storage.qdrant.api_key = Some("secret".to_string());
    config.sources.file_shares.push(FileShareConfig {
        name: "wiki".to_string(),
        root: PathBuf::from("/srv/wiki"),
        extensions: vec![],
    });

    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [storage]
        vector_backend = "vector_qdrant"

        [storage.qdrant]
        url = "https://qdrant.internal:6334"
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.storage.vector_backend, "vector_qdrant");
    assert_eq!(parsed.storage.qdrant.url, "https://qdrant.internal:6334");
    assert_eq!(parsed.storage.qdrant.timeout_seconds, 30);
    assert_eq!(parsed.storage.document_backend, "doc_sqlite");
}

#[test]
#[serial]
fn load_missing_file_returns_defaults_rooted_at_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.database_path(), temp_dir.path().join("metadata.db"));
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
#[serial]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.storage.vector_dimension = 384;
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded.storage.vector_dimension, 384);
}

#[test]
#[serial]
fn env_overrides_secrets() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized test, no other threads read the environment
    unsafe {
        std::env::set_var("RAG_STORE_QDRANT_API_KEY", "from-env");
    }
    let config = Config::load(temp_dir.path()).expect("should load");
    // SAFETY: see above
    unsafe {
        std::env::remove_var("RAG_STORE_QDRANT_API_KEY");
    }
    assert_eq!(config.storage.qdrant.api_key.as_deref(), Some("from-env"));
}

#[test]
#[serial]
fn invalid_file_fails_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[storage]\ndocument_backend = \"couchdb\"\n",
    )
    .expect("should write config");
    assert!(Config::load(temp_dir.path()).is_err());
}
