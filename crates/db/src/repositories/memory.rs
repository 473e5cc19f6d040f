//! In-memory repository implementations for tests and wiring without a
//! database. Semantics mirror the SQL implementations, including the
//! one-active-conversation conflict and the atomic budget reservation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use cadence_core::domain::channel::{Channel, ChannelId};
use cadence_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use cadence_core::domain::message::{Message, MessageId, MessageStatus};
use cadence_core::domain::queue::{QueueEntry, QueueEntryId, QueueEntryStatus, QueueType};
use cadence_core::domain::trigger::{Trigger, TriggerId};
use cadence_core::hours::WeeklySchedule;

use super::{
    ChannelRepository, ConversationRepository, MessageRepository, QueueRepository,
    RepositoryError, ScheduleRepository, TriggerRepository,
};

#[derive(Default)]
pub struct InMemoryTriggerRepository {
    triggers: RwLock<HashMap<TriggerId, Trigger>>,
}

impl InMemoryTriggerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TriggerRepository for InMemoryTriggerRepository {
    async fn find_by_id(&self, id: &TriggerId) -> Result<Option<Trigger>, RepositoryError> {
        Ok(self.triggers.read().await.get(id).cloned())
    }

    async fn save(&self, trigger: Trigger) -> Result<(), RepositoryError> {
        self.triggers.write().await.insert(trigger.id.clone(), trigger);
        Ok(())
    }

    async fn record_fire(
        &self,
        id: &TriggerId,
        created_conversation: bool,
    ) -> Result<(), RepositoryError> {
        if let Some(trigger) = self.triggers.write().await.get_mut(id) {
            trigger.total_triggered += 1;
            if created_conversation {
                trigger.total_conversations += 1;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn find_active_by_phone(
        &self,
        tenant_id: &str,
        contact_phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .conversations
            .read()
            .await
            .values()
            .find(|conversation| {
                conversation.tenant_id == tenant_id
                    && conversation.contact_phone == contact_phone
                    && conversation.status == ConversationStatus::Active
            })
            .cloned())
    }

    async fn insert(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let duplicate = conversation.status == ConversationStatus::Active
            && conversations.values().any(|existing| {
                existing.tenant_id == conversation.tenant_id
                    && existing.contact_phone == conversation.contact_phone
                    && existing.status == ConversationStatus::Active
            });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "active conversation already exists for contact {}",
                conversation.contact_phone
            )));
        }
        conversations.insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn update(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        self.conversations.write().await.insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn touch_last_message(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        from_agent: bool,
    ) -> Result<(), RepositoryError> {
        if let Some(conversation) = self.conversations.write().await.get_mut(id) {
            conversation.last_message_at = Some(at);
            if from_agent {
                conversation.last_agent_message_at = Some(at);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn mark_sent(
        &self,
        id: &MessageId,
        channel_message_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(message) =
            self.messages.write().await.iter_mut().find(|message| &message.id == id)
        {
            message.status = MessageStatus::Sent;
            message.channel_message_id = channel_message_id;
            message.error_message = None;
            message.updated_at = at;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &MessageId,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(message) =
            self.messages.write().await.iter_mut().find(|message| &message.id == id)
        {
            message.status = MessageStatus::Failed;
            message.error_message = Some(error_message.to_string());
            message.updated_at = at;
        }
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut matching: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryQueueRepository {
    entries: RwLock<Vec<QueueEntry>>,
}

impl InMemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<QueueEntry> {
        self.entries.read().await.clone()
    }

    async fn close(
        &self,
        id: &QueueEntryId,
        status: QueueEntryStatus,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut entries = self.entries.write().await;
        match entries
            .iter_mut()
            .find(|entry| &entry.id == id && entry.status == QueueEntryStatus::Pending)
        {
            Some(entry) => {
                entry.status = status;
                entry.resolved_by = Some(resolved_by.to_string());
                entry.resolved_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn insert(&self, entry: QueueEntry) -> Result<(), RepositoryError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn find_by_id(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>, RepositoryError> {
        Ok(self.entries.read().await.iter().find(|entry| &entry.id == id).cloned())
    }

    async fn list_pending(
        &self,
        queue_type: QueueType,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let mut pending: Vec<QueueEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| {
                entry.queue_type == queue_type && entry.status == QueueEntryStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn find_pending_for_conversation(
        &self,
        conversation_id: &ConversationId,
        queue_type: QueueType,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| {
                &entry.conversation_id == conversation_id
                    && entry.queue_type == queue_type
                    && entry.status == QueueEntryStatus::Pending
            })
            .min_by_key(|entry| entry.created_at)
            .cloned())
    }

    async fn mark_resolved(
        &self,
        id: &QueueEntryId,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.close(id, QueueEntryStatus::Resolved, resolved_by, at).await
    }

    async fn mark_dismissed(
        &self,
        id: &QueueEntryId,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.close(id, QueueEntryStatus::Dismissed, resolved_by, at).await
    }
}

#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<HashMap<ChannelId, Channel>>,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn find_by_id(&self, id: &ChannelId) -> Result<Option<Channel>, RepositoryError> {
        Ok(self.channels.read().await.get(id).cloned())
    }

    async fn save(&self, channel: Channel) -> Result<(), RepositoryError> {
        self.channels.write().await.insert(channel.instance_id.clone(), channel);
        Ok(())
    }

    async fn try_reserve_send(
        &self,
        id: &ChannelId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // Check and increment under one write lock.
        let mut channels = self.channels.write().await;
        match channels.get_mut(id) {
            Some(channel) if channel.has_daily_budget() => {
                channel.messages_sent_today += 1;
                channel.last_message_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<String, WeeklySchedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn find_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Option<WeeklySchedule>, RepositoryError> {
        Ok(self.schedules.read().await.get(agent_id).cloned())
    }

    async fn save(
        &self,
        agent_id: &str,
        schedule: WeeklySchedule,
    ) -> Result<(), RepositoryError> {
        self.schedules.write().await.insert(agent_id.to_string(), schedule);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use cadence_core::domain::channel::{Channel, ChannelId, ChannelStatus};
    use cadence_core::domain::conversation::{Conversation, ConversationStatus, NewConversation};

    use super::{InMemoryChannelRepository, InMemoryConversationRepository};
    use crate::repositories::{ChannelRepository, ConversationRepository, RepositoryError};

    fn sample_conversation(phone: &str) -> Conversation {
        Conversation::start(
            NewConversation {
                tenant_id: "tenant-1".to_string(),
                channel_id: ChannelId("wa-main".to_string()),
                agent_id: None,
                trigger_id: None,
                contact_phone: phone.to_string(),
                contact_name: None,
                external_lead_id: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn in_memory_insert_enforces_the_active_contact_invariant() {
        let repo = InMemoryConversationRepository::new();
        repo.insert(sample_conversation("33612345678")).await.expect("first insert");

        let error = repo
            .insert(sample_conversation("33612345678"))
            .await
            .expect_err("duplicate active conversation");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let mut completed = sample_conversation("33698765432");
        completed.transition_to(ConversationStatus::Completed).expect("complete");
        repo.insert(completed).await.expect("terminal conversations do not conflict");
        repo.insert(sample_conversation("33698765432")).await.expect("new active insert");
    }

    #[tokio::test]
    async fn in_memory_reserve_matches_sql_semantics() {
        let repo = InMemoryChannelRepository::new();
        repo.save(Channel {
            instance_id: ChannelId("wa-main".to_string()),
            tenant_id: "tenant-1".to_string(),
            daily_limit: 2,
            messages_sent_today: 0,
            last_message_at: None,
            status: ChannelStatus::Connected,
            created_at: Utc::now(),
        })
        .await
        .expect("save channel");

        let id = ChannelId("wa-main".to_string());
        assert!(repo.try_reserve_send(&id, Utc::now()).await.expect("first"));
        assert!(repo.try_reserve_send(&id, Utc::now()).await.expect("second"));
        assert!(!repo.try_reserve_send(&id, Utc::now()).await.expect("third is denied"));
        assert!(!repo
            .try_reserve_send(&ChannelId("missing".to_string()), Utc::now())
            .await
            .expect("unknown channel is denied"));
    }
}
