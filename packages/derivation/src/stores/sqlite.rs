//! SQLite storage implementation.
//!
//! A file-based backend good for local development, single-server
//! deployments, and tests that need persistence across restarts.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{DerivationError, Result};
use crate::traits::LabelValueStore;
use crate::types::{LabelId, LabelValue, LabelValueId, RunId};

/// SQLite-based label value store.
///
/// Lineage is persisted as a JSON array of value ids alongside each row,
/// and rows carry an explicit position so insertion order survives a
/// round trip.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `file:./derivation.db` - File-based database
    /// - `file:./test.db?mode=rwc` - Create if not exists
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self> {
        // A pool of one keeps every handle on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS label_values (
                id TEXT PRIMARY KEY,
                label_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                value TEXT NOT NULL,
                is_iterated INTEGER NOT NULL DEFAULT 0,
                lineage TEXT NOT NULL DEFAULT '[]',
                position INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_label_values_pair ON label_values(label_id, run_id);
            CREATE INDEX IF NOT EXISTS idx_label_values_run ON label_values(run_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dirty_marks (
                label_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                PRIMARY KEY (label_id, run_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct ValueRow {
    id: String,
    label_id: String,
    run_id: String,
    value: String,
    is_iterated: bool,
    lineage: String,
}

impl ValueRow {
    fn into_label_value(self) -> Result<LabelValue> {
        let value: serde_json::Value = serde_json::from_str(&self.value)
            .map_err(|e| DerivationError::Storage(format!("invalid value JSON: {}", e).into()))?;

        let lineage_ids: Vec<String> = serde_json::from_str(&self.lineage)
            .map_err(|e| DerivationError::Storage(format!("invalid lineage JSON: {}", e).into()))?;
        let lineage = lineage_ids
            .iter()
            .map(|text| parse_uuid(text).map(LabelValueId))
            .collect::<Result<Vec<_>>>()?;

        Ok(LabelValue {
            id: LabelValueId(parse_uuid(&self.id)?),
            label_id: LabelId(parse_uuid(&self.label_id)?),
            run_id: RunId(parse_uuid(&self.run_id)?),
            value,
            is_iterated: self.is_iterated,
            lineage,
        })
    }
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text)
        .map_err(|e| DerivationError::Storage(format!("invalid uuid '{}': {}", text, e).into()))
}

fn lineage_json(row: &LabelValue) -> Result<String> {
    let ids: Vec<String> = row.lineage.iter().map(|id| id.to_string()).collect();
    serde_json::to_string(&ids).map_err(|e| DerivationError::Storage(e.to_string().into()))
}

#[async_trait]
impl LabelValueStore for SqliteStore {
    async fn replace(
        &self,
        label_id: LabelId,
        run_id: RunId,
        rows: Vec<LabelValue>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        sqlx::query("DELETE FROM label_values WHERE label_id = ? AND run_id = ?")
            .bind(label_id.to_string())
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        for (position, row) in rows.iter().enumerate() {
            let value = serde_json::to_string(&row.value)
                .map_err(|e| DerivationError::Storage(e.to_string().into()))?;
            let lineage = lineage_json(row)?;

            sqlx::query(
                r#"
                INSERT INTO label_values (id, label_id, run_id, value, is_iterated, lineage, position)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id.to_string())
            .bind(row.label_id.to_string())
            .bind(row.run_id.to_string())
            .bind(&value)
            .bind(row.is_iterated)
            .bind(&lineage)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;
        }

        sqlx::query("DELETE FROM dirty_marks WHERE label_id = ? AND run_id = ?")
            .bind(label_id.to_string())
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        tx.commit()
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;
        Ok(())
    }

    async fn values_for(&self, label_id: LabelId, run_id: RunId) -> Result<Vec<LabelValue>> {
        let rows = sqlx::query_as::<_, ValueRow>(
            r#"
            SELECT id, label_id, run_id, value, is_iterated, lineage
            FROM label_values
            WHERE label_id = ? AND run_id = ?
            ORDER BY position
            "#,
        )
        .bind(label_id.to_string())
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        rows.into_iter().map(ValueRow::into_label_value).collect()
    }

    async fn values_for_run(&self, run_id: RunId) -> Result<Vec<LabelValue>> {
        let rows = sqlx::query_as::<_, ValueRow>(
            r#"
            SELECT id, label_id, run_id, value, is_iterated, lineage
            FROM label_values
            WHERE run_id = ?
            ORDER BY label_id, position
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        rows.into_iter().map(ValueRow::into_label_value).collect()
    }

    async fn values_referencing(&self, id: LabelValueId) -> Result<Vec<LabelValue>> {
        // Lineage is a JSON array of quoted uuids, so a substring match on
        // the quoted id is exact.
        let pattern = format!("%\"{}\"%", id);
        let rows = sqlx::query_as::<_, ValueRow>(
            r#"
            SELECT id, label_id, run_id, value, is_iterated, lineage
            FROM label_values
            WHERE lineage LIKE ?
            ORDER BY label_id, position
            "#,
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        rows.into_iter().map(ValueRow::into_label_value).collect()
    }

    async fn mark_dirty(&self, pairs: &[(LabelId, RunId)]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        for (label_id, run_id) in pairs {
            sqlx::query("INSERT OR IGNORE INTO dirty_marks (label_id, run_id) VALUES (?, ?)")
                .bind(label_id.to_string())
                .bind(run_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| DerivationError::Storage(e.to_string().into()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;
        Ok(())
    }

    async fn is_dirty(&self, label_id: LabelId, run_id: RunId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM dirty_marks WHERE label_id = ? AND run_id = ?")
            .bind(label_id.to_string())
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DerivationError::Storage(e.to_string().into()))?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replace_round_trips_values_and_lineage() {
        let store = SqliteStore::in_memory().await.unwrap();
        let label = LabelId::new();
        let run = RunId::new();
        let parent = LabelValueId::new();

        let rows = vec![
            LabelValue::new(label, run, json!({"n": 1}))
                .iterated()
                .with_lineage(vec![parent]),
            LabelValue::new(label, run, json!({"n": 2}))
                .iterated()
                .with_lineage(vec![parent]),
        ];
        store.replace(label, run, rows.clone()).await.unwrap();

        let loaded = store.values_for(label, run).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value, json!({"n": 1}));
        assert_eq!(loaded[1].value, json!({"n": 2}));
        assert!(loaded[0].is_iterated);
        assert_eq!(loaded[0].lineage, vec![parent]);
        assert_eq!(loaded[0].id, rows[0].id);
    }

    #[tokio::test]
    async fn replace_discards_previous_set() {
        let store = SqliteStore::in_memory().await.unwrap();
        let label = LabelId::new();
        let run = RunId::new();

        store
            .replace(label, run, vec![LabelValue::new(label, run, json!("old"))])
            .await
            .unwrap();
        store
            .replace(label, run, vec![LabelValue::new(label, run, json!("new"))])
            .await
            .unwrap();

        let loaded = store.values_for(label, run).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].value, json!("new"));
    }

    #[tokio::test]
    async fn values_referencing_follows_lineage() {
        let store = SqliteStore::in_memory().await.unwrap();
        let upstream = LabelId::new();
        let downstream = LabelId::new();
        let run = RunId::new();

        let parent = LabelValue::new(upstream, run, json!([1, 2]));
        let parent_id = parent.id;
        store.replace(upstream, run, vec![parent]).await.unwrap();

        let child = LabelValue::new(downstream, run, json!(1))
            .iterated()
            .with_lineage(vec![parent_id]);
        let orphan = LabelValue::new(downstream, run, json!(2)).iterated();
        store
            .replace(downstream, run, vec![child.clone(), orphan])
            .await
            .unwrap();

        let referencing = store.values_referencing(parent_id).await.unwrap();
        assert_eq!(referencing.len(), 1);
        assert_eq!(referencing[0].id, child.id);
    }

    #[tokio::test]
    async fn replace_clears_dirty_mark() {
        let store = SqliteStore::in_memory().await.unwrap();
        let label = LabelId::new();
        let run = RunId::new();

        store.mark_dirty(&[(label, run)]).await.unwrap();
        assert!(store.is_dirty(label, run).await.unwrap());

        store
            .replace(label, run, vec![LabelValue::new(label, run, json!(1))])
            .await
            .unwrap();
        assert!(!store.is_dirty(label, run).await.unwrap());
    }
}
