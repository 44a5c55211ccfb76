use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// A cached OAuth token row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRecord {
    pub name: String,
    pub token: String,
    /// Expiry instant in epoch milliseconds, as reported by the OAuth gateway.
    pub expires_at: i64,
}

/// Sqlite-backed store for provider tokens.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<TokenRecord>> {
        let record = sqlx::query_as::<_, TokenRecord>(
            "SELECT name, token, expires_at FROM tokens WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch token record")?;
        Ok(record)
    }

    pub async fn upsert(&self, name: &str, token: &str, expires_at: i64) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO tokens (name, token, expires_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(token)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("Failed to upsert token record")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> TokenStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should open");
        let store = TokenStore::new(pool);
        store.run_migrations().await.expect("migrations should run");
        store
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_name() {
        let store = store().await;
        let record = store.get("salute_speech").await.unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let store = store().await;
        store.upsert("salute_speech", "tok-1", 1_700_000_000_000).await.unwrap();

        let record = store.get("salute_speech").await.unwrap().unwrap();
        assert_eq!(record.name, "salute_speech");
        assert_eq!(record.token, "tok-1");
        assert_eq!(record.expires_at, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = store().await;
        store.upsert("giga_chat", "old", 1).await.unwrap();
        store.upsert("giga_chat", "new", 2).await.unwrap();

        let record = store.get("giga_chat").await.unwrap().unwrap();
        assert_eq!(record.token, "new");
        assert_eq!(record.expires_at, 2);
    }
}
