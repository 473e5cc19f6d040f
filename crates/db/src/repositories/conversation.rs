use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::channel::ChannelId;
use cadence_core::domain::conversation::{
    Conversation, ConversationId, ConversationOutcome, ConversationStatus,
};
use cadence_core::domain::trigger::TriggerId;

use super::{parse_optional_timestamp, parse_timestamp, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                tenant_id,
                channel_id,
                agent_id,
                trigger_id,
                contact_phone,
                contact_name,
                external_lead_id,
                status,
                current_step,
                outcome,
                escalation_reason,
                escalated_at,
                completed_at,
                last_message_at,
                last_agent_message_at,
                created_at
             FROM conversations
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_active_by_phone(
        &self,
        tenant_id: &str,
        contact_phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                tenant_id,
                channel_id,
                agent_id,
                trigger_id,
                contact_phone,
                contact_name,
                external_lead_id,
                status,
                current_step,
                outcome,
                escalation_reason,
                escalated_at,
                completed_at,
                last_message_at,
                last_agent_message_at,
                created_at
             FROM conversations
             WHERE tenant_id = ? AND contact_phone = ? AND status = 'active'",
        )
        .bind(tenant_id)
        .bind(contact_phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn insert(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO conversations (
                id,
                tenant_id,
                channel_id,
                agent_id,
                trigger_id,
                contact_phone,
                contact_name,
                external_lead_id,
                status,
                current_step,
                outcome,
                escalation_reason,
                escalated_at,
                completed_at,
                last_message_at,
                last_agent_message_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.tenant_id)
        .bind(&conversation.channel_id.0)
        .bind(conversation.agent_id.as_deref())
        .bind(conversation.trigger_id.as_ref().map(|id| id.0.as_str()))
        .bind(&conversation.contact_phone)
        .bind(conversation.contact_name.as_deref())
        .bind(conversation.external_lead_id.as_deref())
        .bind(conversation.status.as_str())
        .bind(conversation.current_step)
        .bind(conversation.outcome.map(|outcome| outcome.as_str()))
        .bind(conversation.escalation_reason.as_deref())
        .bind(conversation.escalated_at.map(|value| value.to_rfc3339()))
        .bind(conversation.completed_at.map(|value| value.to_rfc3339()))
        .bind(conversation.last_message_at.map(|value| value.to_rfc3339()))
        .bind(conversation.last_agent_message_at.map(|value| value.to_rfc3339()))
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "active conversation already exists for contact {}",
                    conversation.contact_phone
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversations SET
                agent_id = ?,
                contact_name = ?,
                external_lead_id = ?,
                status = ?,
                current_step = ?,
                outcome = ?,
                escalation_reason = ?,
                escalated_at = ?,
                completed_at = ?,
                last_message_at = ?,
                last_agent_message_at = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(conversation.agent_id.as_deref())
        .bind(conversation.contact_name.as_deref())
        .bind(conversation.external_lead_id.as_deref())
        .bind(conversation.status.as_str())
        .bind(conversation.current_step)
        .bind(conversation.outcome.map(|outcome| outcome.as_str()))
        .bind(conversation.escalation_reason.as_deref())
        .bind(conversation.escalated_at.map(|value| value.to_rfc3339()))
        .bind(conversation.completed_at.map(|value| value.to_rfc3339()))
        .bind(conversation.last_message_at.map(|value| value.to_rfc3339()))
        .bind(conversation.last_agent_message_at.map(|value| value.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&conversation.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_last_message(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        from_agent: bool,
    ) -> Result<(), RepositoryError> {
        if from_agent {
            sqlx::query(
                "UPDATE conversations
                 SET last_message_at = ?, last_agent_message_at = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(at.to_rfc3339())
            .bind(at.to_rfc3339())
            .bind(at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE conversations SET last_message_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(at.to_rfc3339())
            .bind(at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ConversationStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_raw}`")))?;

    let outcome = row
        .try_get::<Option<String>, _>("outcome")?
        .map(|value| {
            ConversationOutcome::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown outcome `{value}`")))
        })
        .transpose()?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        tenant_id: row.try_get("tenant_id")?,
        channel_id: ChannelId(row.try_get("channel_id")?),
        agent_id: row.try_get("agent_id")?,
        trigger_id: row.try_get::<Option<String>, _>("trigger_id")?.map(TriggerId),
        contact_phone: row.try_get("contact_phone")?,
        contact_name: row.try_get("contact_name")?,
        external_lead_id: row.try_get("external_lead_id")?,
        status,
        current_step: row.try_get("current_step")?,
        outcome,
        escalation_reason: row.try_get("escalation_reason")?,
        escalated_at: parse_optional_timestamp("escalated_at", row.try_get("escalated_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        last_message_at: parse_optional_timestamp(
            "last_message_at",
            row.try_get("last_message_at")?,
        )?,
        last_agent_message_at: parse_optional_timestamp(
            "last_agent_message_at",
            row.try_get("last_agent_message_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use cadence_core::domain::channel::ChannelId;
    use cadence_core::domain::conversation::{Conversation, ConversationStatus, NewConversation};

    use super::SqlConversationRepository;
    use crate::migrations;
    use crate::repositories::{ConversationRepository, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_conversation_repo_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = sample_conversation("33612345678");

        repo.insert(conversation.clone()).await.expect("insert conversation");
        let found = repo.find_by_id(&conversation.id).await.expect("find conversation");
        assert_eq!(found, Some(conversation.clone()));

        let by_phone = repo
            .find_active_by_phone("tenant-1", "33612345678")
            .await
            .expect("find by phone");
        assert_eq!(by_phone.map(|c| c.id), Some(conversation.id));

        pool.close().await;
    }

    #[tokio::test]
    async fn second_active_conversation_for_same_contact_conflicts() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());

        repo.insert(sample_conversation("33612345678")).await.expect("first insert");
        let error = repo
            .insert(sample_conversation("33612345678"))
            .await
            .expect_err("duplicate active conversation should conflict");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        pool.close().await;
    }

    #[tokio::test]
    async fn terminal_conversation_frees_the_phone_for_a_new_active_one() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let mut first = sample_conversation("33612345678");
        repo.insert(first.clone()).await.expect("insert first");
        first.transition_to(ConversationStatus::Completed).expect("complete");
        first.completed_at = Some(Utc::now());
        repo.update(first).await.expect("update first");

        repo.insert(sample_conversation("33612345678"))
            .await
            .expect("completed conversation should not block a new active one");

        pool.close().await;
    }

    #[tokio::test]
    async fn touch_last_message_stamps_agent_timestamp_only_for_agent_sends() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = sample_conversation("33612345678");
        repo.insert(conversation.clone()).await.expect("insert");

        let at = Utc::now();
        repo.touch_last_message(&conversation.id, at, false).await.expect("contact touch");
        let found = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert!(found.last_message_at.is_some());
        assert!(found.last_agent_message_at.is_none());

        repo.touch_last_message(&conversation.id, at, true).await.expect("agent touch");
        let found = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert!(found.last_agent_message_at.is_some());

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_conversation(phone: &str) -> Conversation {
        Conversation::start(
            NewConversation {
                tenant_id: "tenant-1".to_string(),
                channel_id: ChannelId("wa-main".to_string()),
                agent_id: None,
                trigger_id: None,
                contact_phone: phone.to_string(),
                contact_name: Some("Lea Martin".to_string()),
                external_lead_id: None,
            },
            Utc::now(),
        )
    }
}
