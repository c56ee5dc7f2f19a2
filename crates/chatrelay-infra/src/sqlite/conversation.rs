//! SQLite conversation-reference store.
//!
//! Implements `ConversationStore` from `chatrelay-core`. Keys are normalised
//! identities; handles are stored as JSON text so unknown platform fields
//! survive a round trip.

use chatrelay_core::conversation::ConversationStore;
use chatrelay_types::conversation::{normalize_identity, ConversationHandle};
use chatrelay_types::error::RepositoryError;
use chrono::Utc;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationStore`.
pub struct SqliteConversationStore {
    pool: DatabasePool,
}

impl SqliteConversationStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn query_error(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        other => RepositoryError::Query(other.to_string()),
    }
}

impl ConversationStore for SqliteConversationStore {
    async fn get(&self, identity: &str) -> Result<Option<ConversationHandle>, RepositoryError> {
        let row = sqlx::query("SELECT handle FROM conversation_refs WHERE identity = ?")
            .bind(normalize_identity(identity))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("handle").map_err(query_error)?;
                let handle = serde_json::from_str(&raw)
                    .map_err(|e| RepositoryError::Query(format!("invalid conversation handle: {e}")))?;
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, identity: &str, handle: &ConversationHandle) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let raw = serde_json::to_string(handle)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize handle: {e}")))?;

        sqlx::query(
            r#"INSERT INTO conversation_refs (identity, handle, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (identity) DO UPDATE SET handle = excluded.handle, updated_at = excluded.updated_at"#,
        )
        .bind(normalize_identity(identity))
        .bind(&raw)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM conversation_refs WHERE identity = ?")
            .bind(normalize_identity(identity))
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT identity FROM conversation_refs ORDER BY identity")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("identity").map_err(query_error))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteConversationStore {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("refs.db").display());
        std::mem::forget(dir);
        SqliteConversationStore::new(DatabasePool::new(&url).await.unwrap())
    }

    fn handle(conversation: &str) -> ConversationHandle {
        let mut handle = ConversationHandle::new(conversation, "29:user")
            .with_service_url("https://chat.example.net/");
        handle
            .extra
            .insert("channelId".to_string(), serde_json::json!("msteams"));
        handle
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = test_store().await;
        assert!(store.get("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_and_get_normalises_identity() {
        let store = test_store().await;
        store.upsert("Someone@Example.com ", &handle("conv-1")).await.unwrap();

        let found = store.get("someone@example.com").await.unwrap().unwrap();
        assert_eq!(found.conversation_id, "conv-1");
        assert_eq!(found.extra["channelId"], "msteams");
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = test_store().await;
        store.upsert("a@example.com", &handle("old")).await.unwrap();
        store.upsert("a@example.com", &handle("new")).await.unwrap();

        let found = store.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.conversation_id, "new");
        assert_eq!(store.list_identities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = test_store().await;
        store.upsert("b@example.com", &handle("cb")).await.unwrap();
        store.upsert("a@example.com", &handle("ca")).await.unwrap();
        assert_eq!(
            store.list_identities().await.unwrap(),
            vec!["a@example.com", "b@example.com"]
        );

        store.delete("B@example.com").await.unwrap();
        assert_eq!(store.list_identities().await.unwrap(), vec!["a@example.com"]);
        store.delete("b@example.com").await.unwrap();
    }
}
