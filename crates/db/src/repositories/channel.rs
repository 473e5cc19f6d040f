use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::channel::{Channel, ChannelId, ChannelStatus};

use super::{parse_optional_timestamp, parse_timestamp, ChannelRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChannelRepository {
    pool: DbPool,
}

impl SqlChannelRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChannelRepository for SqlChannelRepository {
    async fn find_by_id(&self, id: &ChannelId) -> Result<Option<Channel>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                instance_id,
                tenant_id,
                daily_limit,
                messages_sent_today,
                last_message_at,
                status,
                created_at
             FROM whatsapp_accounts
             WHERE instance_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(channel_from_row).transpose()
    }

    async fn save(&self, channel: Channel) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO whatsapp_accounts (
                instance_id,
                tenant_id,
                daily_limit,
                messages_sent_today,
                last_message_at,
                status,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(instance_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                daily_limit = excluded.daily_limit,
                messages_sent_today = excluded.messages_sent_today,
                last_message_at = excluded.last_message_at,
                status = excluded.status",
        )
        .bind(&channel.instance_id.0)
        .bind(&channel.tenant_id)
        .bind(channel.daily_limit)
        .bind(channel.messages_sent_today)
        .bind(channel.last_message_at.map(|value| value.to_rfc3339()))
        .bind(channel.status.as_str())
        .bind(channel.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_reserve_send(
        &self,
        id: &ChannelId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // Single conditional update so two racing senders can never both
        // consume the last unit of budget.
        let result = sqlx::query(
            "UPDATE whatsapp_accounts
             SET messages_sent_today = messages_sent_today + 1, last_message_at = ?
             WHERE instance_id = ? AND messages_sent_today < daily_limit",
        )
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn channel_from_row(row: SqliteRow) -> Result<Channel, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ChannelStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel status `{status_raw}`")))?;

    Ok(Channel {
        instance_id: ChannelId(row.try_get("instance_id")?),
        tenant_id: row.try_get("tenant_id")?,
        daily_limit: row.try_get("daily_limit")?,
        messages_sent_today: row.try_get("messages_sent_today")?,
        last_message_at: parse_optional_timestamp(
            "last_message_at",
            row.try_get("last_message_at")?,
        )?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
