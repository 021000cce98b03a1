//! SQLite-backed snapshot store.
//!
//! The persistence contract is a key-value SET per record: each [`Record`]
//! is serialized to JSON and upserted under its derived key. One cycle's
//! snapshot is written inside a single transaction so a crash mid-write
//! never leaves a half-updated cycle visible.

use crate::advisory::Snapshot;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open a database connection and run migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        // SQLite allows one writer at a time, and an in-memory database is
        // private to its connection, so the pool holds a single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS advisories (
                key TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert every record of a snapshot under its derived key.
    ///
    /// Returns the number of records written. An empty snapshot is a no-op
    /// that leaves previously stored advisories untouched.
    pub async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<usize, StoreError> {
        if snapshot.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (key, record) in snapshot {
            let json = serde_json::to_string(record)?;
            sqlx::query(
                r#"
                INSERT INTO advisories (key, record, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    record = excluded.record,
                    updated_at = excluded.updated_at
            "#,
            )
            .bind(key)
            .bind(json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(snapshot.len())
    }

    /// Fetch one stored record's JSON by key.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM advisories WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(record,)| record))
    }

    /// Number of stored advisories.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM advisories")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::Record;
    use crate::document::Node;
    use pretty_assertions::assert_eq;

    async fn test_store() -> Store {
        Store::open(":memory:").await.unwrap()
    }

    fn test_record(name: &str) -> Record {
        Record {
            title: "Advisory".to_string(),
            name: name.to_string(),
            updated: "2020-05-01T02:00:00Z".to_string(),
            content: "advisory text".to_string(),
            body: Node::Text("warning".to_string()),
        }
    }

    #[tokio::test]
    async fn test_put_snapshot_and_read_back() {
        let store = test_store().await;
        let mut snapshot = Snapshot::new();
        snapshot.insert("Advisory_Office A".to_string(), test_record("Office A"));
        snapshot.insert("Advisory_Office B".to_string(), test_record("Office B"));

        let written = store.put_snapshot(&snapshot).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let json = store.get("Advisory_Office A").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "Office A");
        assert_eq!(value["body"], "warning");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_record() {
        let store = test_store().await;

        let mut first = Snapshot::new();
        first.insert("Advisory_Office".to_string(), test_record("Office"));
        store.put_snapshot(&first).await.unwrap();

        let mut replacement = test_record("Office");
        replacement.content = "updated text".to_string();
        let mut second = Snapshot::new();
        second.insert("Advisory_Office".to_string(), replacement);
        store.put_snapshot(&second).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let json = store.get("Advisory_Office").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["content"], "updated text");
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_noop() {
        let store = test_store().await;
        let mut snapshot = Snapshot::new();
        snapshot.insert("Advisory_Office".to_string(), test_record("Office"));
        store.put_snapshot(&snapshot).await.unwrap();

        let written = store.put_snapshot(&Snapshot::new()).await.unwrap();
        assert_eq!(written, 0);
        // Previously stored advisories survive an empty cycle.
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_key_is_none() {
        let store = test_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
