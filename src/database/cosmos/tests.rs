use super::*;
use crate::identifier::IdFormat;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, header_exists, method, path},
};

const ID: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

fn config_for(server: &MockServer) -> CosmosConfig {
    CosmosConfig {
        endpoint: server.uri(),
        database: "rag".to_string(),
        token: Some("tok".to_string()),
        timeout_seconds: 5,
    }
}

fn store_for(server: &MockServer) -> CosmosDocumentStore {
    CosmosDocumentStore::build(&config_for(server)).expect("should build store")
}

fn record_id() -> RecordId {
    RecordId::parse(ID, IdFormat::Uuid).expect("should parse uuid")
}

#[test]
fn authorization_header_is_url_encoded() {
    assert_eq!(
        authorization_header("abc"),
        "type%3Daad%26ver%3D1.0%26sig%3Dabc"
    );
}

#[test]
fn partition_key_is_json_array() {
    assert_eq!(partition_key(&record_id()), format!("[\"{}\"]", ID));
}

#[test]
fn system_properties_are_stripped() {
    let body = from_cosmos(serde_json::json!({
        "id": ID.to_uppercase(), "_rid": "x", "_etag": "y", "_ts": 1, "name": "n"
    }))
    .expect("should convert");
    assert_eq!(body["id"], ID);
    assert_eq!(body.len(), 2);
}

#[tokio::test]
async fn upsert_posts_with_upsert_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dbs/rag/colls/documents/docs"))
        .and(header("x-ms-documentdb-is-upsert", "True"))
        .and(header("x-ms-version", API_VERSION))
        .and(header_exists("x-ms-date"))
        .and(header_exists("Authorization"))
        .and(body_partial_json(serde_json::json!({ "id": ID, "title": "Intro" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": ID })))
        .expect(1)
        .mount(&server)
        .await;

    let mut body = JsonMap::new();
    body.insert("title".to_string(), "Intro".into());
    store_for(&server)
        .collection("documents")
        .upsert(&record_id(), &body)
        .await
        .expect("upsert should succeed");
}

#[tokio::test]
async fn get_returns_none_on_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/dbs/rag/colls/documents/docs/{}", ID)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let document = store_for(&server)
        .collection("documents")
        .get(&record_id())
        .await
        .expect("404 should not be an error");
    assert!(document.is_none());
}

#[tokio::test]
async fn query_follows_continuation_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dbs/rag/colls/collections/docs"))
        .and(header("x-ms-continuation", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Documents": [ { "id": "11111111-1111-4111-8111-111111111111", "name": "a" } ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dbs/rag/colls/collections/docs"))
        .and(header("x-ms-documentdb-isquery", "True"))
        .and(body_partial_json(serde_json::json!({
            "query": "SELECT * FROM c WHERE c[\"name\"] = @value",
            "parameters": [ { "name": "@value", "value": "a" } ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-continuation", "page2")
                .set_body_json(serde_json::json!({
                    "Documents": [ { "id": ID, "name": "a" } ]
                })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let found = store_for(&server)
        .collection("collections")
        .find_eq("name", "a")
        .await
        .expect("query should succeed");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0]["id"], ID);
}

#[tokio::test]
async fn delete_missing_document_returns_false() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let removed = store_for(&server)
        .collection("documents")
        .delete(&record_id())
        .await
        .expect("delete should succeed");
    assert!(!removed);
}

#[tokio::test]
async fn throttling_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let error = store_for(&server)
        .collection("documents")
        .get(&record_id())
        .await
        .expect_err("429 should fail");
    assert!(error.is_transient());
}

#[tokio::test]
async fn construction_reads_the_database() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dbs/rag"))
        .and(header_exists("x-ms-date"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rag" })))
        .expect(1)
        .mount(&server)
        .await;

    CosmosDocumentStore::new(&config_for(&server))
        .await
        .expect("reachable account should connect");
}

#[tokio::test]
async fn unavailable_account_fails_at_construction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dbs/rag"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let error = CosmosDocumentStore::new(&config_for(&server))
        .await
        .expect_err("503 should fail construction");
    assert!(matches!(error, StoreError::BackendUnavailable { .. }));
}
