//! Persistence of relay exchanges and the usage statistics derived from them.

use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};

use crate::error::Result;

/// Number of exchanges returned in `recent_conversations`.
pub const RECENT_LIMIT: i64 = 5;

const MAX_CONNECTIONS: u32 = 5;

/// One persisted query/response/outcome record.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Exchange {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub response: String,
    pub created_at: NaiveDateTime,
    pub response_time: f64,
    pub error_occurred: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub total_conversations: i64,
    pub avg_response_time: f64,
    /// Percentage of exchanges that ended in an error, 0 when there are none.
    pub error_rate: f64,
    /// Newest first.
    pub recent_conversations: Vec<Exchange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    pub total_users: i64,
    pub total_conversations: i64,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub recent_conversations: Vec<Exchange>,
}

/// Append-only store of exchanges backed by a SQLite pool.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    /// Open (creating if missing) the database at `database_url` and make
    /// sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                response_time REAL NOT NULL DEFAULT 0,
                error_occurred BOOLEAN NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations (user_id, id)",
        )
        .execute(&self.pool)
        .await?;

        info!("Conversation table ready");
        Ok(())
    }

    /// Persist one exchange and return its row id.
    pub async fn save(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        response_time: f64,
        error_occurred: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO conversations (user_id, message, response, response_time, error_occurred)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(user_id)
        .bind(message)
        .bind(response)
        .bind(response_time.max(0.0))
        .bind(error_occurred)
        .execute(&self.pool)
        .await
        .inspect_err(|e| error!("Failed to save conversation: {e}"))?;

        info!("Saved conversation for user {user_id}");
        Ok(result.last_insert_rowid())
    }

    /// Most recent exchanges of a user, newest first.
    pub async fn user_history(&self, user_id: &str, limit: i64) -> Result<Vec<Exchange>> {
        let rows = sqlx::query_as::<_, Exchange>(
            r"
            SELECT id, user_id, message, response, created_at, response_time, error_occurred
            FROM conversations
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2
            ",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| error!("Failed to load conversation history: {e}"))?;

        Ok(rows)
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN error_occurred THEN 1 ELSE 0 END), 0) AS errors,
                   AVG(response_time) AS avg_time
            FROM conversations
            WHERE user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|e| error!("Failed to load user statistics: {e}"))?;

        let total: i64 = row.try_get("total")?;
        let errors: i64 = row.try_get("errors")?;
        let avg: Option<f64> = row.try_get("avg_time")?;

        Ok(UserStats {
            total_conversations: total,
            avg_response_time: avg.unwrap_or(0.0),
            error_rate: error_rate(errors, total),
            recent_conversations: self.user_history(user_id, RECENT_LIMIT).await?,
        })
    }

    pub async fn total_stats(&self) -> Result<GlobalStats> {
        let row = sqlx::query(
            r"
            SELECT COUNT(DISTINCT user_id) AS users,
                   COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN error_occurred THEN 1 ELSE 0 END), 0) AS errors,
                   AVG(response_time) AS avg_time
            FROM conversations
            ",
        )
        .fetch_one(&self.pool)
        .await
        .inspect_err(|e| error!("Failed to load global statistics: {e}"))?;

        let users: i64 = row.try_get("users")?;
        let total: i64 = row.try_get("total")?;
        let errors: i64 = row.try_get("errors")?;
        let avg: Option<f64> = row.try_get("avg_time")?;

        let recent = sqlx::query_as::<_, Exchange>(
            r"
            SELECT id, user_id, message, response, created_at, response_time, error_occurred
            FROM conversations
            ORDER BY id DESC
            LIMIT $1
            ",
        )
        .bind(RECENT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(GlobalStats {
            total_users: users,
            total_conversations: total,
            avg_response_time: avg.unwrap_or(0.0),
            error_rate: error_rate(errors, total),
            recent_conversations: recent,
        })
    }

    #[cfg(test)]
    pub(crate) async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

#[allow(clippy::cast_precision_loss)]
fn error_rate(errors: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64 * 100.0
    }
}
