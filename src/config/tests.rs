use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.storage.document_backend = "doc_cosmos".to_string();
        original_config.storage.vector_backend = "vector_oracle".to_string();
        original_config.storage.oracle.schema = "vectors".to_string();
        original_config.sources.file_shares.push(FileShareConfig {
            name: "handbook".to_string(),
            root: PathBuf::from("/srv/handbook"),
            extensions: vec!["md".to_string(), "txt".to_string()],
        });

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
        assert!(loaded_config.validate().is_ok());
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [storage
            document_backend = "doc_sqlite"
            vector_dimension = "big"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let invalid_toml = r#"
            [storage]
            vector_dimension = "big"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
