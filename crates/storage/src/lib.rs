use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::{ChatMessage, ChatRole, ConnectionTarget};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

const SERVER_URL_KEY: &str = "server_url";
const AUTH_TOKEN_KEY: &str = "auth_token";

/// Local persistence the chat client needs: the last connection target and
/// the chat history. Every operation reports failure explicitly; callers
/// decide whether a failed load or save is fatal.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn load_connection(&self) -> Result<ConnectionTarget>;
    async fn save_connection(&self, target: &ConnectionTarget) -> Result<()>;
    async fn clear_connection(&self) -> Result<()>;
    async fn load_chat_history(&self) -> Result<Vec<ChatMessage>>;
    /// Replaces the stored history with `messages`, keeping their order.
    async fn save_chat_history(&self, messages: &[ChatMessage]) -> Result<()>;
    async fn clear_chat_history(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url '{database_url}'"))?
            .create_if_missing(true);
        // Every connection to an in-memory database sees its own empty
        // database, so those pools are pinned to one connection that never
        // expires.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;

        let storage = Self { pool };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS client_settings (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure client_settings table exists")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                position   INTEGER PRIMARY KEY NOT NULL,
                message_id TEXT NOT NULL,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                timestamp  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure chat_history table exists")?;

        Ok(())
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM client_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read setting '{key}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }
}

#[async_trait]
impl ChatStore for Storage {
    async fn load_connection(&self) -> Result<ConnectionTarget> {
        Ok(ConnectionTarget {
            url: self.setting(SERVER_URL_KEY).await?.unwrap_or_default(),
            token: self.setting(AUTH_TOKEN_KEY).await?.unwrap_or_default(),
        })
    }

    async fn save_connection(&self, target: &ConnectionTarget) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(SERVER_URL_KEY, &target.url), (AUTH_TOKEN_KEY, &target.token)] {
            sqlx::query(
                "INSERT INTO client_settings (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write setting '{key}'"))?;
        }
        tx.commit().await.context("failed to commit connection")?;
        Ok(())
    }

    async fn clear_connection(&self) -> Result<()> {
        sqlx::query("DELETE FROM client_settings WHERE key IN (?, ?)")
            .bind(SERVER_URL_KEY)
            .bind(AUTH_TOKEN_KEY)
            .execute(&self.pool)
            .await
            .context("failed to clear connection")?;
        Ok(())
    }

    async fn load_chat_history(&self) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT message_id, role, content, timestamp FROM chat_history ORDER BY position ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load chat history")?;

        Ok(rows
            .into_iter()
            .map(|r| ChatMessage {
                id: r.get::<String, _>(0),
                role: ChatRole::from_wire(&r.get::<String, _>(1)),
                content: r.get::<String, _>(2),
                timestamp: r.get::<String, _>(3),
            })
            .collect())
    }

    async fn save_chat_history(&self, messages: &[ChatMessage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_history")
            .execute(&mut *tx)
            .await
            .context("failed to reset chat history")?;

        for (position, message) in messages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chat_history (position, message_id, role, content, timestamp)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(position as i64)
            .bind(&message.id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(&message.timestamp)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store message {}", message.id))?;
        }

        tx.commit().await.context("failed to commit chat history")?;
        Ok(())
    }

    async fn clear_chat_history(&self) -> Result<()> {
        sqlx::query("DELETE FROM chat_history")
            .execute(&self.pool)
            .await
            .context("failed to clear chat history")?;
        Ok(())
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
