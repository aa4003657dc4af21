// Database access layer (SQLite via sqlx): a small JSON document store.

use std::future::Future;

use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// A stored document: a JSON object keyed by string.
pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value document persistence used by the point ledger.
pub trait DocumentStore: Send + Sync + 'static {
    /// Load a document. Missing keys yield `Ok(None)`.
    fn load_document(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Replace a document atomically.
    fn save_document(
        &self,
        key: &str,
        document: &Document,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every connection to an in-memory SQLite database is its own database,
        // so keep exactly one and never recycle it.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Keys of all stored documents, sorted.
    #[cfg(test)]
    pub async fn list_keys(&self) -> Result<Vec<String>, sqlx::Error> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM documents ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }
}

impl DocumentStore for Database {
    async fn load_document(&self, key: &str) -> Result<Option<Document>, StoreError> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM documents WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn save_document(&self, key: &str, document: &Document) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        sqlx::query(
            "INSERT INTO documents (key, body) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
        )
        .bind(key)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
