use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::conversation::ConversationId;
use cadence_core::domain::message::{
    Message, MessageDirection, MessageId, MessageStatus, SenderType,
};

use super::{parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (
                id,
                conversation_id,
                direction,
                sender_type,
                content,
                status,
                script_step_used,
                channel_message_id,
                error_message,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.direction.as_str())
        .bind(message.sender_type.as_str())
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.script_step_used)
        .bind(message.channel_message_id.as_deref())
        .bind(message.error_message.as_deref())
        .bind(message.created_at.to_rfc3339())
        .bind(message.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_sent(
        &self,
        id: &MessageId,
        channel_message_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE messages
             SET status = 'sent', channel_message_id = ?, error_message = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(channel_message_id.as_deref())
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &MessageId,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE messages
             SET status = 'failed', error_message = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error_message)
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                conversation_id,
                direction,
                sender_type,
                content,
                status,
                script_step_used,
                channel_message_id,
                error_message,
                created_at,
                updated_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown direction `{direction_raw}`")))?;

    let sender_raw = row.try_get::<String, _>("sender_type")?;
    let sender_type = SenderType::parse(&sender_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sender type `{sender_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = MessageStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message status `{status_raw}`")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        direction,
        sender_type,
        content: row.try_get("content")?,
        status,
        script_step_used: row.try_get("script_step_used")?,
        channel_message_id: row.try_get("channel_message_id")?,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use cadence_core::domain::channel::ChannelId;
    use cadence_core::domain::conversation::{Conversation, ConversationId, NewConversation};
    use cadence_core::domain::message::{Message, MessageStatus, SenderType};

    use super::SqlMessageRepository;
    use crate::migrations;
    use crate::repositories::{
        ConversationRepository, MessageRepository, SqlConversationRepository,
    };
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn messages_are_listed_in_send_order() {
        let pool = setup_pool().await;
        let repo = SqlMessageRepository::new(pool.clone());
        let conversation_id = seed_conversation(&pool).await;

        let start = Utc::now();
        let first = Message::outbound_pending(
            conversation_id.clone(),
            SenderType::Agent,
            "Bonjour Lea !",
            Some(1),
            start,
        );
        let second =
            Message::inbound(conversation_id.clone(), "Hi there", start + Duration::seconds(5));
        repo.insert(first.clone()).await.expect("insert first");
        repo.insert(second.clone()).await.expect("insert second");

        let listed = repo.list_for_conversation(&conversation_id).await.expect("list");
        assert_eq!(listed, vec![first, second]);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_sent_stamps_the_channel_message_id() {
        let pool = setup_pool().await;
        let repo = SqlMessageRepository::new(pool.clone());
        let conversation_id = seed_conversation(&pool).await;

        let message = Message::outbound_pending(
            conversation_id.clone(),
            SenderType::Agent,
            "Bonjour",
            Some(1),
            Utc::now(),
        );
        repo.insert(message.clone()).await.expect("insert");
        repo.mark_sent(&message.id, Some("wamid.123".to_string()), Utc::now())
            .await
            .expect("mark sent");

        let listed = repo.list_for_conversation(&conversation_id).await.expect("list");
        assert_eq!(listed[0].status, MessageStatus::Sent);
        assert_eq!(listed[0].channel_message_id.as_deref(), Some("wamid.123"));
        assert!(listed[0].error_message.is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_failed_keeps_the_transport_error() {
        let pool = setup_pool().await;
        let repo = SqlMessageRepository::new(pool.clone());
        let conversation_id = seed_conversation(&pool).await;

        let message = Message::outbound_pending(
            conversation_id.clone(),
            SenderType::Agent,
            "Bonjour",
            None,
            Utc::now(),
        );
        repo.insert(message.clone()).await.expect("insert");
        repo.mark_failed(&message.id, "transport timeout", Utc::now())
            .await
            .expect("mark failed");

        let listed = repo.list_for_conversation(&conversation_id).await.expect("list");
        assert_eq!(listed[0].status, MessageStatus::Failed);
        assert_eq!(listed[0].error_message.as_deref(), Some("transport timeout"));

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seed_conversation(pool: &DbPool) -> ConversationId {
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = Conversation::start(
            NewConversation {
                tenant_id: "tenant-1".to_string(),
                channel_id: ChannelId("wa-main".to_string()),
                agent_id: None,
                trigger_id: None,
                contact_phone: "33612345678".to_string(),
                contact_name: None,
                external_lead_id: None,
            },
            Utc::now(),
        );
        let id = conversation.id.clone();
        repo.insert(conversation).await.expect("seed conversation");
        id
    }
}
