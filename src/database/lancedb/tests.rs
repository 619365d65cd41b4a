use super::*;
use crate::identifier::IdFormat;
use tempfile::TempDir;

async fn create_test_store() -> (TempDir, LanceVectorStore) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = LanceVectorStore::new(temp_dir.path().join("vectors"))
        .await
        .expect("should open LanceDB");
    (temp_dir, store)
}

fn point(document_id: &str, vector: Vec<f32>) -> VectorPoint {
    VectorPoint {
        id: RecordId::derive(IdFormat::Uuid, document_id).expect("uuid ids can be derived"),
        document_id: document_id.to_string(),
        vector,
    }
}

#[tokio::test]
async fn ensure_is_idempotent() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_test");

    collection.ensure(3).await.expect("first ensure should create");
    collection.ensure(3).await.expect("second ensure should be a no-op");
}

#[tokio::test]
async fn search_returns_cosine_distance_closest_first() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_test");
    collection.ensure(3).await.expect("should create table");

    collection
        .upsert(&[
            point("same", vec![1.0, 0.0, 0.0]),
            point("orthogonal", vec![0.0, 1.0, 0.0]),
            point("opposite", vec![-1.0, 0.0, 0.0]),
        ])
        .await
        .expect("should upsert");

    let hits = collection
        .search(&[1.0, 0.0, 0.0], 3)
        .await
        .expect("should search");

    let order: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(order, vec!["same", "orthogonal", "opposite"]);
    assert!(hits[0].score.abs() < 1e-5);
    assert!((hits[1].score - 1.0).abs() < 1e-5);
    assert!((hits[2].score - 2.0).abs() < 1e-5);
}

#[tokio::test]
async fn upsert_replaces_existing_point() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_test");
    collection.ensure(2).await.expect("should create table");

    collection
        .upsert(&[point("doc", vec![1.0, 0.0])])
        .await
        .expect("should insert");
    collection
        .upsert(&[point("doc", vec![0.0, 1.0])])
        .await
        .expect("should replace");

    let hits = collection.search(&[0.0, 1.0], 10).await.expect("should search");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].score.abs() < 1e-5);
}

#[tokio::test]
async fn delete_removes_points() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_test");
    collection.ensure(2).await.expect("should create table");

    let keep = point("keep", vec![1.0, 0.0]);
    let drop = point("drop", vec![0.0, 1.0]);
    collection
        .upsert(&[keep, drop.clone()])
        .await
        .expect("should insert");
    collection.delete(&[drop.id]).await.expect("should delete");

    let hits = collection.search(&[1.0, 1.0], 10).await.expect("should search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "keep");
}

#[tokio::test]
async fn missing_table_searches_empty() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_missing");

    assert!(collection.search(&[1.0], 5).await.expect("should search").is_empty());
    collection
        .delete(&[RecordId::generate(IdFormat::Uuid)])
        .await
        .expect("deleting from a missing table is a no-op");
}

#[tokio::test]
async fn mixed_dimensions_are_rejected() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_test");
    collection.ensure(2).await.expect("should create table");

    let result = collection
        .upsert(&[point("a", vec![1.0, 0.0]), point("b", vec![1.0])])
        .await;
    assert!(matches!(result, Err(StoreError::BackendRejected { .. })));
}

#[tokio::test]
async fn closed_store_reports_unavailable() {
    let (_temp_dir, store) = create_test_store().await;
    let collection = store.collection("c_test");
    store.close().await.expect("should close");

    let error = collection.ensure(2).await.expect_err("closed store should fail");
    assert!(error.is_transient());
}

#[test]
fn id_predicate_quotes_every_id() {
    let a = RecordId::parse("67e55044-10b1-426f-9247-bb680e5fe0c8", IdFormat::Uuid)
        .expect("should parse");
    let predicate = id_predicate([a.clone(), a].iter());
    assert_eq!(
        predicate,
        "id IN ('67e55044-10b1-426f-9247-bb680e5fe0c8', '67e55044-10b1-426f-9247-bb680e5fe0c8')"
    );
}
