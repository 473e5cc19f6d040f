use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use cadence_core::domain::channel::{Channel, ChannelId};
use cadence_core::domain::conversation::{Conversation, ConversationId};
use cadence_core::domain::message::{Message, MessageId};
use cadence_core::domain::queue::{QueueEntry, QueueEntryId, QueueType};
use cadence_core::domain::trigger::{Trigger, TriggerId};
use cadence_core::hours::WeeklySchedule;

pub mod channel;
pub mod conversation;
pub mod memory;
pub mod message;
pub mod queue;
pub mod schedule;
pub mod trigger;

pub use channel::SqlChannelRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryChannelRepository, InMemoryConversationRepository, InMemoryMessageRepository,
    InMemoryQueueRepository, InMemoryScheduleRepository, InMemoryTriggerRepository,
};
pub use message::SqlMessageRepository;
pub use queue::SqlQueueRepository;
pub use schedule::SqlScheduleRepository;
pub use trigger::SqlTriggerRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[async_trait]
pub trait TriggerRepository: Send + Sync {
    async fn find_by_id(&self, id: &TriggerId) -> Result<Option<Trigger>, RepositoryError>;
    async fn save(&self, trigger: Trigger) -> Result<(), RepositoryError>;
    /// Bumps the trigger's running counters. Best-effort bookkeeping, called
    /// after a conversation has been created.
    async fn record_fire(
        &self,
        id: &TriggerId,
        created_conversation: bool,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;
    async fn find_active_by_phone(
        &self,
        tenant_id: &str,
        contact_phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// Plain insert. A second `active` conversation for the same
    /// (tenant, phone) pair fails with [`RepositoryError::Conflict`].
    async fn insert(&self, conversation: Conversation) -> Result<(), RepositoryError>;
    async fn update(&self, conversation: Conversation) -> Result<(), RepositoryError>;
    async fn touch_last_message(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        from_agent: bool,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: Message) -> Result<(), RepositoryError>;
    async fn mark_sent(
        &self,
        id: &MessageId,
        channel_message_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn mark_failed(
        &self,
        id: &MessageId,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn insert(&self, entry: QueueEntry) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>, RepositoryError>;
    /// Pending entries of one queue type, oldest first.
    async fn list_pending(&self, queue_type: QueueType)
        -> Result<Vec<QueueEntry>, RepositoryError>;
    async fn find_pending_for_conversation(
        &self,
        conversation_id: &ConversationId,
        queue_type: QueueType,
    ) -> Result<Option<QueueEntry>, RepositoryError>;
    /// Returns false when the entry is absent or no longer pending.
    async fn mark_resolved(
        &self,
        id: &QueueEntryId,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn mark_dismissed(
        &self,
        id: &QueueEntryId,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn find_by_id(&self, id: &ChannelId) -> Result<Option<Channel>, RepositoryError>;
    async fn save(&self, channel: Channel) -> Result<(), RepositoryError>;
    /// The rate governor. Atomically consumes one unit of the channel's daily
    /// budget and stamps `last_message_at`; returns false when the cap is
    /// already reached. Must be a single conditional update, never
    /// read-then-write.
    async fn try_reserve_send(
        &self,
        id: &ChannelId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn find_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Option<WeeklySchedule>, RepositoryError>;
    async fn save(&self, agent_id: &str, schedule: WeeklySchedule)
        -> Result<(), RepositoryError>;
}
