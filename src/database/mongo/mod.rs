// Document backend speaking the Mongo HTTP data API.
// Ids are stored as `_id: {"$oid": ...}` and surfaced to callers as `id`.


use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::http::{HttpClient, HttpRequest, Method};
use super::{DocumentBackend, DocumentCollection, JsonMap, Lifecycle};
use crate::collections::COLLECTIONS;
use crate::config::MongoConfig;
use crate::identifier::{BackendKind, RecordId};
use crate::{Result, StoreError};

const KIND: BackendKind = BackendKind::DocMongo;

#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    client: Arc<HttpClient>,
    data_source: String,
    database: String,
    lifecycle: Lifecycle,
}

impl MongoDocumentStore {
    /// Build the client and read one metadata document to prove the API answers
    pub async fn new(config: &MongoConfig) -> Result<Self> {
        let store = Self::build(config)?;
        store
            .handle(COLLECTIONS)
            .action("findOne", json!({ "filter": {} }))
            .await?;
        Ok(store)
    }

    pub(crate) fn build(config: &MongoConfig) -> Result<Self> {
        let mut client = HttpClient::new(
            KIND,
            &config.endpoint,
            Duration::from_secs(config.timeout_seconds),
        )?;
        if let Some(api_key) = &config.api_key {
            client = client.with_header("api-key", api_key.clone());
        }

        info!(
            "Using Mongo data API at {} (database {})",
            config.endpoint, config.database
        );

        Ok(Self {
            client: Arc::new(client),
            data_source: config.data_source.clone(),
            database: config.database.clone(),
            lifecycle: Lifecycle::default(),
        })
    }

    fn handle(&self, name: &str) -> MongoCollection {
        MongoCollection {
            client: Arc::clone(&self.client),
            data_source: self.data_source.clone(),
            database: self.database.clone(),
            name: name.to_string(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

#[async_trait]
impl DocumentBackend for MongoDocumentStore {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(self.handle(name))
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing Mongo document store");
        }
        Ok(())
    }
}

struct MongoCollection {
    client: Arc<HttpClient>,
    data_source: String,
    database: String,
    name: String,
    lifecycle: Lifecycle,
}

impl MongoCollection {
    async fn action(&self, action: &str, extra: Value) -> Result<Value> {
        self.lifecycle.check(KIND)?;

        let mut body = json!({
            "dataSource": self.data_source,
            "database": self.database,
            "collection": self.name,
        });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }

        let reply = self
            .client
            .send(HttpRequest::new(Method::Post, format!("action/{}", action)).json(&body))
            .await?;
        Ok(reply.body)
    }
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, id: &RecordId, body: &JsonMap) -> Result<()> {
        let mut fields = body.clone();
        fields.remove("id");
        fields.remove("_id");

        self.action(
            "updateOne",
            json!({
                "filter": id_filter(id),
                "update": { "$set": fields },
                "upsert": true,
            }),
        )
        .await?;

        debug!("Upserted {} in {}", id, self.name);
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<JsonMap>> {
        let reply = self
            .action("findOne", json!({ "filter": id_filter(id) }))
            .await?;

        match reply.get("document") {
            None | Some(Value::Null) => Ok(None),
            Some(document) => from_mongo(document.clone()).map(Some),
        }
    }

    async fn find_eq(&self, field: &str, value: &str) -> Result<Vec<JsonMap>> {
        let reply = self
            .action("find", json!({ "filter": { field: value } }))
            .await?;
        documents(reply)
    }

    async fn list(&self, limit: usize) -> Result<Vec<JsonMap>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let reply = self
            .action("find", json!({ "filter": {}, "limit": limit }))
            .await?;
        documents(reply)
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let reply = self
            .action("deleteOne", json!({ "filter": id_filter(id) }))
            .await?;

        Ok(reply
            .get("deletedCount")
            .and_then(Value::as_u64)
            .is_some_and(|count| count > 0))
    }
}

fn id_filter(id: &RecordId) -> Value {
    json!({ "_id": { "$oid": id.as_str() } })
}

fn documents(reply: Value) -> Result<Vec<JsonMap>> {
    match reply.get("documents") {
        Some(Value::Array(items)) => items.iter().cloned().map(from_mongo).collect(),
        _ => Err(malformed("find reply has no documents array")),
    }
}

/// Convert a stored document back into a body keyed by a plain `id`
fn from_mongo(document: Value) -> Result<JsonMap> {
    let Value::Object(mut map) = document else {
        return Err(malformed("document is not an object"));
    };

    let id = match map.remove("_id") {
        Some(Value::String(id)) => id,
        Some(Value::Object(oid)) => oid
            .get("$oid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed("_id is not an ObjectId"))?,
        _ => return Err(malformed("document has no _id")),
    };
    let id = RecordId::parse(&id, KIND.id_format())?;
    map.insert("id".to_string(), Value::String(id.into_string()));

    Ok(map)
}

fn malformed(message: &str) -> StoreError {
    StoreError::BackendRejected {
        backend: KIND.to_string(),
        message: message.to_string(),
    }
}
