use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::models::*;
use crate::Result;
use crate::database::sqlx_error;
use crate::identifier::BackendKind;

fn db_error(err: sqlx::Error) -> crate::StoreError {
    sqlx_error(BackendKind::DocSqlite, err)
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn upsert(pool: &SqlitePool, collection: &str, id: &str, body: &str) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, created_date, updated_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (collection, id) DO UPDATE SET
                body = excluded.body,
                updated_date = excluded.updated_date
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(db_error)?;

        debug!("Upserted document {} in {}", id, collection);
        Ok(())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, collection: &str, id: &str) -> Result<Option<DocumentRow>> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT collection, id, body, created_date, updated_date FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error)
    }

    /// Match on a top-level string attribute of the stored JSON body
    #[inline]
    pub async fn find_eq(
        pool: &SqlitePool,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<DocumentRow>> {
        let path = format!("$.\"{}\"", field);
        sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT collection, id, body, created_date, updated_date
            FROM documents
            WHERE collection = ? AND json_extract(body, ?) = ?
            ORDER BY created_date, id
            "#,
        )
        .bind(collection)
        .bind(path)
        .bind(value)
        .fetch_all(pool)
        .await
        .map_err(db_error)
    }

    #[inline]
    pub async fn list(pool: &SqlitePool, collection: &str, limit: usize) -> Result<Vec<DocumentRow>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT collection, id, body, created_date, updated_date
            FROM documents
            WHERE collection = ?
            ORDER BY created_date, id
            LIMIT ?
            "#,
        )
        .bind(collection)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(db_error)
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct SyncStateQueries;

/// Sync state rows belong to one source synced into one collection
impl SyncStateQueries {
    #[inline]
    pub async fn list_for_source(
        pool: &SqlitePool,
        source_name: &str,
        collection: &str,
    ) -> Result<Vec<SyncStateRow>> {
        sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT source_name, collection, record_id, document_id, fingerprint, synced_date
            FROM sync_state
            WHERE source_name = ? AND collection = ?
            ORDER BY record_id
            "#,
        )
        .bind(source_name)
        .bind(collection)
        .fetch_all(pool)
        .await
        .map_err(db_error)
    }

    /// Apply one completed sync run atomically
    pub async fn apply_run(
        pool: &SqlitePool,
        source_name: &str,
        collection: &str,
        upserts: &[(String, String, Option<String>)],
        removed_document_ids: &[String],
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.map_err(db_error)?;

        for document_id in removed_document_ids {
            sqlx::query(
                "DELETE FROM sync_state WHERE source_name = ? AND collection = ? AND document_id = ?",
            )
            .bind(source_name)
            .bind(collection)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        for (record_id, document_id, fingerprint) in upserts {
            sqlx::query(
                r#"
                INSERT INTO sync_state (source_name, collection, record_id, document_id, fingerprint, synced_date)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (source_name, collection, record_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    fingerprint = excluded.fingerprint,
                    synced_date = excluded.synced_date
                "#,
            )
            .bind(source_name)
            .bind(collection)
            .bind(record_id)
            .bind(document_id)
            .bind(fingerprint)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        sqlx::query(
            r#"
            INSERT INTO sync_runs (source_name, collection, added, deleted, finished_date)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(source_name)
        .bind(collection)
        .bind(i64::try_from(upserts.len()).unwrap_or(i64::MAX))
        .bind(i64::try_from(removed_document_ids.len()).unwrap_or(i64::MAX))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        debug!(
            "Recorded sync run for {} into {}: {} upserted, {} removed",
            source_name,
            collection,
            upserts.len(),
            removed_document_ids.len()
        );
        Ok(())
    }

    /// Latest run of `source_name` into each collection it was synced to
    pub async fn latest_runs(pool: &SqlitePool, source_name: &str) -> Result<Vec<SyncRunRow>> {
        sqlx::query_as::<_, SyncRunRow>(
            r#"
            SELECT id, source_name, collection, added, deleted, finished_date
            FROM sync_runs
            WHERE id IN (
                SELECT MAX(id) FROM sync_runs WHERE source_name = ? GROUP BY collection
            )
            ORDER BY collection
            "#,
        )
        .bind(source_name)
        .fetch_all(pool)
        .await
        .map_err(db_error)
    }

    #[inline]
    pub async fn latest_run(
        pool: &SqlitePool,
        source_name: &str,
        collection: &str,
    ) -> Result<Option<SyncRunRow>> {
        sqlx::query_as::<_, SyncRunRow>(
            r#"
            SELECT id, source_name, collection, added, deleted, finished_date
            FROM sync_runs
            WHERE source_name = ? AND collection = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(source_name)
        .bind(collection)
        .fetch_optional(pool)
        .await
        .map_err(db_error)
    }
}
