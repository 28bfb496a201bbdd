use chrono::{DateTime, Utc};
use sqlx::Row;

use coachline_core::context::ConversationContext;

use super::{ContextRepository, RepositoryError, StoredContext};
use crate::DbPool;

pub struct SqlContextRepository {
    pool: DbPool,
}

impl SqlContextRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_stored(row: &sqlx::sqlite::SqliteRow) -> Result<StoredContext, RepositoryError> {
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let topics_json: String =
        row.try_get("topics").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let topics = serde_json::from_str::<Vec<String>>(&topics_json).map_err(|e| {
        RepositoryError::Decode(format!("conversation_context.topics for `{user_id}`: {e}"))
    })?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(StoredContext { user_id, topics, updated_at })
}

#[async_trait::async_trait]
impl ContextRepository for SqlContextRepository {
    async fn find_latest(&self, user_id: &str) -> Result<Option<StoredContext>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, topics, updated_at FROM conversation_context WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_stored).transpose()
    }

    async fn upsert(
        &self,
        user_id: &str,
        context: &ConversationContext,
    ) -> Result<(), RepositoryError> {
        let topics = serde_json::to_string(&context.pack().unwrap_or_default())
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO conversation_context (user_id, topics, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 topics = excluded.topics,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(topics)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversation_context WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
