use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::super::JsonMap;
use crate::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentRow {
    pub collection: String,
    pub id: String,
    pub body: String,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

impl DocumentRow {
    pub fn into_body(self) -> Result<JsonMap> {
        match serde_json::from_str(&self.body)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(StoreError::BackendRejected {
                backend: "doc_sqlite".to_string(),
                message: format!("stored document {} is not a JSON object", self.id),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncStateRow {
    pub source_name: String,
    pub collection: String,
    pub record_id: String,
    pub document_id: String,
    pub fingerprint: Option<String>,
    pub synced_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncRunRow {
    pub id: i64,
    pub source_name: String,
    pub collection: String,
    pub added: i64,
    pub deleted: i64,
    pub finished_date: NaiveDateTime,
}
