#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Integration tests for the composite store over the local backends
use rag_store::{
    StoreError,
    collections::NewCollection,
    config::Config,
    store::{CompositeStore, NewDocument},
};
use tempfile::TempDir;

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.storage.vector_dimension = 4;
    (config, temp_dir)
}

fn unit(axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; 4];
    vector[axis] = 1.0;
    vector
}

#[tokio::test]
async fn collections_survive_reconnect() {
    let (config, _temp_dir) = create_test_config();

    let store = CompositeStore::connect(&config)
        .await
        .expect("should connect local backends");
    let created = store
        .create_collection(&NewCollection {
            name: "handbook".to_string(),
            kind: Some("policy".to_string()),
            description: None,
        })
        .await
        .expect("should create collection");
    let document = store
        .upsert_document("handbook", NewDocument::new("remote work").with_embedding(unit(0)))
        .await
        .expect("should upsert");
    store.close().await.expect("should close");

    let reopened = CompositeStore::connect(&config)
        .await
        .expect("should reconnect");
    let resolved = reopened.resolve("handbook").await.expect("should resolve");
    assert_eq!(resolved.id.as_str(), created.id);

    let hits = reopened
        .similarity_search("handbook", &unit(0), 1)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.id, document.id);
    assert_eq!(hits[0].distance.to_string(), "0");
    reopened.close().await.expect("should close");
}

#[tokio::test]
async fn concurrent_first_use_creates_one_collection() {
    let (config, _temp_dir) = create_test_config();
    let store = std::sync::Arc::new(
        CompositeStore::connect(&config)
            .await
            .expect("should connect local backends"),
    );

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .upsert_document("shared", NewDocument::new(format!("doc {}", i)))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("upsert should succeed");
    }

    let collections = store.list_collections(100).await.expect("should list");
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].display_name, "Shared");
}

#[tokio::test]
async fn searches_across_collections_are_independent() {
    let (config, _temp_dir) = create_test_config();
    let store = CompositeStore::connect(&config)
        .await
        .expect("should connect local backends");

    store
        .upsert_document("alpha", NewDocument::new("in alpha").with_embedding(unit(1)))
        .await
        .expect("should upsert alpha");
    store
        .upsert_document("beta", NewDocument::new("in beta").with_embedding(unit(1)))
        .await
        .expect("should upsert beta");

    let query = unit(1);
    let (alpha, beta) = tokio::join!(
        store.similarity_search("alpha", &query, 5),
        store.similarity_search("beta", &query, 5),
    );
    let alpha = alpha.expect("alpha search");
    let beta = beta.expect("beta search");

    assert_eq!(alpha.len(), 1);
    assert_eq!(beta.len(), 1);
    assert_eq!(alpha[0].document.content, "in alpha");
    assert_eq!(beta[0].document.content, "in beta");
}

#[tokio::test]
async fn unknown_backend_fails_at_connect() {
    let (mut config, _temp_dir) = create_test_config();
    config.storage.vector_backend = "vector_pinecone".to_string();

    let error = CompositeStore::connect(&config)
        .await
        .err()
        .expect("unknown backend should fail");
    assert!(matches!(error, StoreError::UnsupportedBackend(_)));
}
