use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::channel::ChannelId;
use cadence_core::domain::trigger::{ProviderType, Trigger, TriggerId};

use super::{parse_timestamp, RepositoryError, TriggerRepository};
use crate::DbPool;

pub struct SqlTriggerRepository {
    pool: DbPool,
}

impl SqlTriggerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const TRIGGER_COLUMNS: &str = "id,
    tenant_id,
    provider_type,
    webhook_secret,
    is_active,
    trigger_event,
    event_filters,
    channel_id,
    agent_id,
    first_message_template,
    first_message_delay_seconds,
    total_triggered,
    total_conversations,
    total_bookings,
    created_at,
    updated_at";

#[async_trait::async_trait]
impl TriggerRepository for SqlTriggerRepository {
    async fn find_by_id(&self, id: &TriggerId) -> Result<Option<Trigger>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(trigger_from_row).transpose()
    }

    async fn save(&self, trigger: Trigger) -> Result<(), RepositoryError> {
        let event_filters = serde_json::to_string(&trigger.event_filters)
            .map_err(|error| RepositoryError::Decode(format!("event_filters encode: {error}")))?;

        sqlx::query(
            "INSERT INTO triggers (
                id,
                tenant_id,
                provider_type,
                webhook_secret,
                is_active,
                trigger_event,
                event_filters,
                channel_id,
                agent_id,
                first_message_template,
                first_message_delay_seconds,
                total_triggered,
                total_conversations,
                total_bookings,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                provider_type = excluded.provider_type,
                webhook_secret = excluded.webhook_secret,
                is_active = excluded.is_active,
                trigger_event = excluded.trigger_event,
                event_filters = excluded.event_filters,
                channel_id = excluded.channel_id,
                agent_id = excluded.agent_id,
                first_message_template = excluded.first_message_template,
                first_message_delay_seconds = excluded.first_message_delay_seconds,
                total_triggered = excluded.total_triggered,
                total_conversations = excluded.total_conversations,
                total_bookings = excluded.total_bookings,
                updated_at = excluded.updated_at",
        )
        .bind(&trigger.id.0)
        .bind(&trigger.tenant_id)
        .bind(trigger.provider_type.as_str())
        .bind(&trigger.webhook_secret)
        .bind(trigger.is_active)
        .bind(&trigger.trigger_event)
        .bind(event_filters)
        .bind(&trigger.channel_id.0)
        .bind(trigger.agent_id.as_deref())
        .bind(&trigger.first_message_template)
        .bind(i64::from(trigger.first_message_delay_seconds))
        .bind(trigger.total_triggered)
        .bind(trigger.total_conversations)
        .bind(trigger.total_bookings)
        .bind(trigger.created_at.to_rfc3339())
        .bind(trigger.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_fire(
        &self,
        id: &TriggerId,
        created_conversation: bool,
    ) -> Result<(), RepositoryError> {
        let conversation_bump = i64::from(created_conversation);
        sqlx::query(
            "UPDATE triggers
             SET total_triggered = total_triggered + 1,
                 total_conversations = total_conversations + ?
             WHERE id = ?",
        )
        .bind(conversation_bump)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn trigger_from_row(row: SqliteRow) -> Result<Trigger, RepositoryError> {
    let provider_raw = row.try_get::<String, _>("provider_type")?;
    let provider_type = ProviderType::parse(&provider_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown provider `{provider_raw}`")))?;

    let filters_raw = row.try_get::<String, _>("event_filters")?;
    let event_filters: BTreeMap<String, Value> = serde_json::from_str(&filters_raw)
        .map_err(|error| RepositoryError::Decode(format!("event_filters decode: {error}")))?;

    let delay = row.try_get::<i64, _>("first_message_delay_seconds")?;
    let first_message_delay_seconds = u32::try_from(delay).map_err(|_| {
        RepositoryError::Decode(format!("invalid first_message_delay_seconds: {delay}"))
    })?;

    Ok(Trigger {
        id: TriggerId(row.try_get("id")?),
        tenant_id: row.try_get("tenant_id")?,
        provider_type,
        webhook_secret: row.try_get("webhook_secret")?,
        is_active: row.try_get("is_active")?,
        trigger_event: row.try_get("trigger_event")?,
        event_filters,
        channel_id: ChannelId(row.try_get("channel_id")?),
        agent_id: row.try_get("agent_id")?,
        first_message_template: row.try_get("first_message_template")?,
        first_message_delay_seconds,
        total_triggered: row.try_get("total_triggered")?,
        total_conversations: row.try_get("total_conversations")?,
        total_bookings: row.try_get("total_bookings")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
