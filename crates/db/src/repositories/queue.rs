use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::conversation::ConversationId;
use cadence_core::domain::queue::{QueueEntry, QueueEntryId, QueueEntryStatus, QueueType};

use super::{parse_optional_timestamp, parse_timestamp, QueueRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQueueRepository {
    pool: DbPool,
}

impl SqlQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const QUEUE_COLUMNS: &str = "id,
    conversation_id,
    queue_type,
    status,
    priority,
    original_message,
    reason,
    suggested_response,
    scheduled_for,
    resolved_by,
    resolved_at,
    created_at";

#[async_trait::async_trait]
impl QueueRepository for SqlQueueRepository {
    async fn insert(&self, entry: QueueEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO message_queue (
                id,
                conversation_id,
                queue_type,
                status,
                priority,
                original_message,
                reason,
                suggested_response,
                scheduled_for,
                resolved_by,
                resolved_at,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.conversation_id.0)
        .bind(entry.queue_type.as_str())
        .bind(entry.status.as_str())
        .bind(entry.priority)
        .bind(&entry.original_message)
        .bind(&entry.reason)
        .bind(entry.suggested_response.as_deref())
        .bind(entry.scheduled_for.map(|value| value.to_rfc3339()))
        .bind(entry.resolved_by.as_deref())
        .bind(entry.resolved_at.map(|value| value.to_rfc3339()))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(entry_from_row).transpose()
    }

    async fn list_pending(
        &self,
        queue_type: QueueType,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM message_queue
             WHERE status = 'pending' AND queue_type = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(queue_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn find_pending_for_conversation(
        &self,
        conversation_id: &ConversationId,
        queue_type: QueueType,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM message_queue
             WHERE conversation_id = ? AND queue_type = ? AND status = 'pending'
             ORDER BY created_at ASC
             LIMIT 1"
        ))
        .bind(&conversation_id.0)
        .bind(queue_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn mark_resolved(
        &self,
        id: &QueueEntryId,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.close_entry(id, "resolved", resolved_by, at).await
    }

    async fn mark_dismissed(
        &self,
        id: &QueueEntryId,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.close_entry(id, "dismissed", resolved_by, at).await
    }
}

impl SqlQueueRepository {
    // Guarded on status so an entry can only be closed once.
    async fn close_entry(
        &self,
        id: &QueueEntryId,
        status: &str,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE message_queue
             SET status = ?, resolved_by = ?, resolved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(resolved_by)
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn entry_from_row(row: SqliteRow) -> Result<QueueEntry, RepositoryError> {
    let type_raw = row.try_get::<String, _>("queue_type")?;
    let queue_type = QueueType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown queue type `{type_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = QueueEntryStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown queue status `{status_raw}`")))?;

    Ok(QueueEntry {
        id: QueueEntryId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        queue_type,
        status,
        priority: row.try_get("priority")?,
        original_message: row.try_get("original_message")?,
        reason: row.try_get("reason")?,
        suggested_response: row.try_get("suggested_response")?,
        scheduled_for: parse_optional_timestamp("scheduled_for", row.try_get("scheduled_for")?)?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
