// Document backend for the Cosmos REST API.
// Containers are partitioned on `/id`, so point reads pass the id as partition key.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::http::{HttpClient, HttpReply, HttpRequest, Method};
use super::{DocumentBackend, DocumentCollection, JsonMap, Lifecycle};
use crate::collections::COLLECTIONS;
use crate::config::CosmosConfig;
use crate::identifier::{BackendKind, RecordId};
use crate::{Result, StoreError};

const KIND: BackendKind = BackendKind::DocCosmos;
const API_VERSION: &str = "2018-12-31";
const CONTINUATION: &str = "x-ms-continuation";
const SYSTEM_PROPERTIES: [&str; 5] = ["_rid", "_self", "_etag", "_attachments", "_ts"];

#[derive(Debug, Clone)]
pub struct CosmosDocumentStore {
    client: Arc<HttpClient>,
    database: String,
    token: Option<String>,
    lifecycle: Lifecycle,
}

impl CosmosDocumentStore {
    /// Build the client and read the database resource to prove the account answers
    pub async fn new(config: &CosmosConfig) -> Result<Self> {
        let store = Self::build(config)?;
        let container = store.container(COLLECTIONS);
        container
            .send(container.request(Method::Get, format!("dbs/{}", store.database)))
            .await?;
        Ok(store)
    }

    pub(crate) fn build(config: &CosmosConfig) -> Result<Self> {
        let client = HttpClient::new(
            KIND,
            &config.endpoint,
            Duration::from_secs(config.timeout_seconds),
        )?
        .with_header("x-ms-version", API_VERSION);

        info!(
            "Using Cosmos endpoint {} (database {})",
            config.endpoint, config.database
        );

        Ok(Self {
            client: Arc::new(client),
            database: config.database.clone(),
            token: config.token.clone(),
            lifecycle: Lifecycle::default(),
        })
    }

    fn container(&self, name: &str) -> CosmosContainer {
        CosmosContainer {
            client: Arc::clone(&self.client),
            docs_path: format!("dbs/{}/colls/{}/docs", self.database, name),
            token: self.token.clone(),
            name: name.to_string(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

#[async_trait]
impl DocumentBackend for CosmosDocumentStore {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(self.container(name))
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing Cosmos document store");
        }
        Ok(())
    }
}

struct CosmosContainer {
    client: Arc<HttpClient>,
    docs_path: String,
    token: Option<String>,
    name: String,
    lifecycle: Lifecycle,
}

impl CosmosContainer {
    /// Every request carries a fresh date and the AAD authorization header
    fn request(&self, method: Method, path: String) -> HttpRequest {
        let mut request = HttpRequest::new(method, path).header("x-ms-date", rfc1123_now());
        if let Some(token) = &self.token {
            request = request.header("Authorization", authorization_header(token));
        }
        request
    }

    fn document_path(&self, id: &RecordId) -> String {
        format!("{}/{}", self.docs_path, id)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpReply> {
        self.lifecycle.check(KIND)?;
        self.client.send(request).await
    }

    /// Run a SQL query across partitions, following continuation tokens
    async fn query(&self, query: &str, parameters: Value, limit: Option<usize>) -> Result<Vec<JsonMap>> {
        let body = json!({ "query": query, "parameters": parameters });
        let mut results = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::Post, self.docs_path.clone())
                .json(&body)
                .content_type("application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .header("x-ms-documentdb-query-enablecrosspartition", "True");
            if let Some(token) = &continuation {
                request = request.header(CONTINUATION, token.clone());
            }

            let reply = self.send(request).await?;
            let Some(Value::Array(documents)) = reply.body.get("Documents") else {
                return Err(malformed("query reply has no Documents array"));
            };
            for document in documents {
                results.push(from_cosmos(document.clone())?);
            }

            if limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
            match reply.header(CONTINUATION) {
                Some(token) if !token.is_empty() => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        if let Some(limit) = limit {
            results.truncate(limit);
        }
        debug!("Query on {} returned {} documents", self.name, results.len());
        Ok(results)
    }
}

#[async_trait]
impl DocumentCollection for CosmosContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, id: &RecordId, body: &JsonMap) -> Result<()> {
        let mut document = body.clone();
        document.insert("id".to_string(), Value::String(id.to_string()));

        let request = self
            .request(Method::Post, self.docs_path.clone())
            .json(&Value::Object(document))
            .header("x-ms-documentdb-is-upsert", "True")
            .header("x-ms-documentdb-partitionkey", partition_key(id));
        self.send(request).await?;

        debug!("Upserted {} in {}", id, self.name);
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<JsonMap>> {
        let request = self
            .request(Method::Get, self.document_path(id))
            .header("x-ms-documentdb-partitionkey", partition_key(id))
            .allow_not_found();
        let reply = self.send(request).await?;

        if reply.is_not_found() {
            return Ok(None);
        }
        from_cosmos(reply.body).map(Some)
    }

    async fn find_eq(&self, field: &str, value: &str) -> Result<Vec<JsonMap>> {
        if field.contains(['"', '\\']) {
            return Err(malformed(&format!("unsupported field name {:?}", field)));
        }
        let query = format!("SELECT * FROM c WHERE c[\"{}\"] = @value", field);
        self.query(&query, json!([{ "name": "@value", "value": value }]), None)
            .await
    }

    async fn list(&self, limit: usize) -> Result<Vec<JsonMap>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.query("SELECT * FROM c", json!([]), Some(limit)).await
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let request = self
            .request(Method::Delete, self.document_path(id))
            .header("x-ms-documentdb-partitionkey", partition_key(id))
            .allow_not_found();
        let reply = self.send(request).await?;
        Ok(!reply.is_not_found())
    }
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn authorization_header(token: &str) -> String {
    let raw = format!("type=aad&ver=1.0&sig={}", token);
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn partition_key(id: &RecordId) -> String {
    json!([id.as_str()]).to_string()
}

fn from_cosmos(document: Value) -> Result<JsonMap> {
    let Value::Object(mut map) = document else {
        return Err(malformed("document is not an object"));
    };
    for property in SYSTEM_PROPERTIES {
        map.remove(property);
    }

    let id = map
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("document has no id"))?;
    let id = RecordId::parse(id, KIND.id_format())?;
    map.insert("id".to_string(), Value::String(id.into_string()));

    Ok(map)
}

fn malformed(message: &str) -> StoreError {
    StoreError::BackendRejected {
        backend: KIND.to_string(),
        message: message.to_string(),
    }
}
