// Vector backend for Oracle AI Vector Search through ORDS REST-enabled SQL.
// Ids are RAW(16) columns exchanged as 32 uppercase hex digits.


use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http::{HttpClient, HttpRequest, Method};
use super::{
    Lifecycle, NativeHit, VectorBackend, VectorCollection, VectorPoint, sql_identifier,
    vector_literal,
};
use crate::config::OracleConfig;
use crate::identifier::{BackendKind, RecordId};
use crate::score::ScoreConvention;
use crate::{Result, StoreError};

const KIND: BackendKind = BackendKind::VectorOracle;

#[derive(Debug, Clone)]
pub struct OracleVectorStore {
    client: Arc<HttpClient>,
    sql_path: String,
    lifecycle: Lifecycle,
}

impl OracleVectorStore {
    /// Build the client and run one round trip through REST-enabled SQL
    pub async fn new(config: &OracleConfig) -> Result<Self> {
        let store = Self::build(config)?;
        store.table("dual").execute("SELECT 1 FROM dual", Vec::new()).await?;
        Ok(store)
    }

    pub(crate) fn build(config: &OracleConfig) -> Result<Self> {
        let mut client = HttpClient::new(
            KIND,
            &config.url,
            Duration::from_secs(config.timeout_seconds),
        )?;
        if let Some(password) = &config.password {
            let credentials = STANDARD.encode(format!("{}:{}", config.username, password));
            client = client.with_header("Authorization", format!("Basic {}", credentials));
        }

        info!("Using Oracle REST SQL at {} (schema {})", config.url, config.schema);
        Ok(Self {
            client: Arc::new(client),
            sql_path: format!("{}/_/sql", config.schema),
            lifecycle: Lifecycle::default(),
        })
    }

    fn table(&self, name: &str) -> OracleTable {
        OracleTable {
            client: Arc::clone(&self.client),
            sql_path: self.sql_path.clone(),
            name: name.to_string(),
            table: sql_identifier(name),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

#[async_trait]
impl VectorBackend for OracleVectorStore {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::CosineDistance
    }

    fn collection(&self, name: &str) -> Arc<dyn VectorCollection> {
        Arc::new(self.table(name))
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close() {
            info!("Closing Oracle vector store");
        }
        Ok(())
    }
}

struct OracleTable {
    client: Arc<HttpClient>,
    sql_path: String,
    name: String,
    table: String,
    lifecycle: Lifecycle,
}

impl OracleTable {
    /// Run one statement and return its first result item
    async fn execute(&self, statement: &str, binds: Vec<Value>) -> Result<Value> {
        self.lifecycle.check(KIND)?;

        let body = json!({ "statementText": statement, "binds": binds });
        let reply = self
            .client
            .send(HttpRequest::new(Method::Post, self.sql_path.clone()).json(&body))
            .await?;

        let item = reply
            .body
            .pointer("/items/0")
            .cloned()
            .ok_or_else(|| rejected("SQL reply has no items".to_string()))?;
        if let Some(message) = item.get("errorMessage").and_then(Value::as_str) {
            warn!("Oracle rejected statement on {}: {}", self.table, message);
            return Err(rejected(message.to_string()));
        }
        Ok(item)
    }
}

#[async_trait]
impl VectorCollection for OracleTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure(&self, dimension: usize) -> Result<()> {
        self.execute(&create_table_sql(&self.table, dimension), Vec::new())
            .await?;
        debug!("Ensured Oracle table {}", self.table);
        Ok(())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let mut binds = Vec::with_capacity(points.len() * 3);
        for (i, point) in points.iter().enumerate() {
            binds.push(bind(&format!("id{}", i), point.id.as_str()));
            binds.push(bind(&format!("doc{}", i), &point.document_id));
            binds.push(bind(&format!("vec{}", i), &vector_literal(&point.vector)));
        }

        self.execute(&merge_sql(&self.table, points.len()), binds)
            .await?;
        debug!("Merged {} rows into {}", points.len(), self.table);
        Ok(())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let binds = ids
            .iter()
            .enumerate()
            .map(|(i, id)| bind(&format!("id{}", i), id.as_str()))
            .collect();
        self.execute(&delete_sql(&self.table, ids.len()), binds)
            .await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<NativeHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let item = self
            .execute(
                &search_sql(&self.table, limit),
                vec![bind("q", &vector_literal(vector))],
            )
            .await?;

        let Some(Value::Array(rows)) = item.pointer("/resultSet/items") else {
            return Err(rejected("query reply has no result set".to_string()));
        };

        Ok(rows.iter().filter_map(parse_row).collect())
    }
}

fn bind(name: &str, value: &str) -> Value {
    json!({ "name": name, "data_type": "VARCHAR2", "value": value })
}

fn create_table_sql(table: &str, dimension: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id RAW(16) PRIMARY KEY, document_id VARCHAR2(256) NOT NULL, embedding VECTOR({}, FLOAT32) NOT NULL)",
        table, dimension
    )
}

fn merge_sql(table: &str, rows: usize) -> String {
    let source = (0..rows)
        .map(|i| {
            format!(
                "SELECT HEXTORAW(:id{i}) AS id, :doc{i} AS document_id, TO_VECTOR(:vec{i}) AS embedding FROM dual"
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    format!(
        "MERGE INTO {table} t USING ({source}) s ON (t.id = s.id) \
         WHEN MATCHED THEN UPDATE SET t.document_id = s.document_id, t.embedding = s.embedding \
         WHEN NOT MATCHED THEN INSERT (id, document_id, embedding) VALUES (s.id, s.document_id, s.embedding)"
    )
}

fn delete_sql(table: &str, rows: usize) -> String {
    let ids = (0..rows)
        .map(|i| format!("HEXTORAW(:id{i})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("DELETE FROM {table} WHERE id IN ({ids})")
}

fn search_sql(table: &str, limit: usize) -> String {
    format!(
        "SELECT RAWTOHEX(id) AS id, document_id, VECTOR_DISTANCE(embedding, TO_VECTOR(:q), COSINE) AS distance \
         FROM {table} ORDER BY distance FETCH FIRST {limit} ROWS ONLY"
    )
}

fn parse_row(row: &Value) -> Option<NativeHit> {
    let id = row.get("id").and_then(Value::as_str)?.to_string();
    let document_id = row.get("document_id").and_then(Value::as_str)?.to_string();
    let score = row.get("distance").and_then(Value::as_f64)?;
    Some(NativeHit {
        id,
        document_id,
        score,
    })
}

fn rejected(message: String) -> StoreError {
    StoreError::BackendRejected {
        backend: KIND.to_string(),
        message,
    }
}
