use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use cadence_core::domain::conversation::{
    Conversation, ConversationId, ConversationOutcome, ConversationStatus, NewConversation,
};
use cadence_core::domain::queue::{QueueEntry, QueueType};
use cadence_core::errors::DomainError;
use cadence_db::repositories::{ConversationRepository, QueueRepository, RepositoryError};

use crate::crm::CrmSyncDispatcher;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("conversation `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Owns the conversation state machine. The only component allowed to create
/// `escalated` queue entries or move a conversation out of `active`.
pub struct ConversationLifecycleManager {
    conversations: Arc<dyn ConversationRepository>,
    queue: Arc<dyn QueueRepository>,
    crm: CrmSyncDispatcher,
}

impl ConversationLifecycleManager {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        queue: Arc<dyn QueueRepository>,
        crm: CrmSyncDispatcher,
    ) -> Self {
        Self { conversations, queue, crm }
    }

    /// Returns the existing active conversation for the contact when there is
    /// one, otherwise inserts a new one. The repository's uniqueness guard
    /// closes the race between two near-simultaneous triggers for the same
    /// phone: the loser of the insert re-reads and adopts the winner's row.
    pub async fn create_or_resume(
        &self,
        request: NewConversation,
    ) -> Result<(Conversation, bool), LifecycleError> {
        if let Some(existing) = self
            .conversations
            .find_active_by_phone(&request.tenant_id, &request.contact_phone)
            .await?
        {
            return Ok((existing, false));
        }

        let conversation = Conversation::start(request, Utc::now());
        match self.conversations.insert(conversation.clone()).await {
            Ok(()) => {
                info!(
                    event_name = "conversation_created",
                    conversation_id = %conversation.id.0,
                    contact_phone = %conversation.contact_phone,
                    "conversation created"
                );
                Ok((conversation, true))
            }
            Err(RepositoryError::Conflict(_)) => {
                let existing = self
                    .conversations
                    .find_active_by_phone(&conversation.tenant_id, &conversation.contact_phone)
                    .await?
                    .ok_or_else(|| {
                        LifecycleError::NotFound(format!(
                            "active conversation for {}",
                            conversation.contact_phone
                        ))
                    })?;
                Ok((existing, false))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Escalates an active conversation to a human and raises exactly one
    /// pending `escalated` queue entry for it. Re-escalating while an entry is
    /// already pending only refreshes nothing: the existing entry stands.
    pub async fn apply_escalation(
        &self,
        id: &ConversationId,
        reason: &str,
        original_message: &str,
        suggested_response: Option<String>,
    ) -> Result<Conversation, LifecycleError> {
        let mut conversation = self.load(id).await?;

        if conversation.status == ConversationStatus::Active {
            conversation.transition_to(ConversationStatus::Escalated)?;
            conversation.escalated_at = Some(Utc::now());
            conversation.escalation_reason = Some(reason.to_string());
            conversation.outcome = Some(ConversationOutcome::Escalated);
            self.conversations.update(conversation.clone()).await?;
        }

        let already_queued = self
            .queue
            .find_pending_for_conversation(id, QueueType::Escalated)
            .await?
            .is_some();
        if !already_queued {
            let entry = QueueEntry::escalated(
                id.clone(),
                original_message,
                reason,
                suggested_response,
                Utc::now(),
            );
            self.queue.insert(entry).await?;
        }

        info!(
            event_name = "conversation_escalated",
            conversation_id = %id.0,
            reason = %reason,
            "conversation escalated"
        );
        self.crm.dispatch_status(
            conversation.external_lead_id.as_deref(),
            ConversationOutcome::Escalated,
        );

        Ok(conversation)
    }

    /// Records an outcome. `not_interested` also terminates the conversation;
    /// the other outcomes leave it active so the exchange can continue.
    pub async fn apply_outcome(
        &self,
        id: &ConversationId,
        outcome: ConversationOutcome,
    ) -> Result<Conversation, LifecycleError> {
        let mut conversation = self.load(id).await?;
        conversation.outcome = Some(outcome);

        if outcome == ConversationOutcome::NotInterested
            && conversation.status == ConversationStatus::Active
        {
            conversation.transition_to(ConversationStatus::Completed)?;
            conversation.completed_at = Some(Utc::now());
        }

        self.conversations.update(conversation.clone()).await?;
        self.crm.dispatch_status(conversation.external_lead_id.as_deref(), outcome);
        Ok(conversation)
    }

    pub async fn advance_step(
        &self,
        id: &ConversationId,
        next_step: i64,
    ) -> Result<(), LifecycleError> {
        let mut conversation = self.load(id).await?;
        if conversation.current_step == next_step {
            return Ok(());
        }
        conversation.current_step = next_step;
        self.conversations.update(conversation).await?;
        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<Conversation, LifecycleError> {
        self.conversations
            .find_by_id(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cadence_core::domain::channel::ChannelId;
    use cadence_core::domain::conversation::{
        ConversationOutcome, ConversationStatus, NewConversation,
    };
    use cadence_core::domain::queue::{QueueEntryStatus, QueueType};
    use cadence_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryQueueRepository,
        QueueRepository,
    };

    use crate::crm::CrmSyncDispatcher;

    use super::ConversationLifecycleManager;

    struct Fixture {
        conversations: Arc<InMemoryConversationRepository>,
        queue: Arc<InMemoryQueueRepository>,
        manager: ConversationLifecycleManager,
    }

    fn fixture() -> Fixture {
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let queue = Arc::new(InMemoryQueueRepository::new());
        let manager = ConversationLifecycleManager::new(
            Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            Arc::clone(&queue) as Arc<dyn QueueRepository>,
            CrmSyncDispatcher::disabled(),
        );
        Fixture { conversations, queue, manager }
    }

    fn request(phone: &str) -> NewConversation {
        NewConversation {
            tenant_id: "tenant-1".to_string(),
            channel_id: ChannelId("wa-main".to_string()),
            agent_id: None,
            trigger_id: None,
            contact_phone: phone.to_string(),
            contact_name: None,
            external_lead_id: None,
        }
    }

    #[tokio::test]
    async fn create_or_resume_is_idempotent_per_phone() {
        let fx = fixture();

        let (first, created) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("create");
        assert!(created);
        assert_eq!(first.status, ConversationStatus::Active);
        assert_eq!(first.current_step, 1);

        let (second, created) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("resume");
        assert!(!created);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn escalation_raises_exactly_one_queue_entry() {
        let fx = fixture();
        let (conversation, _) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("create");

        fx.manager
            .apply_escalation(&conversation.id, "contact asked for a human", "help me", None)
            .await
            .expect("first escalation");
        fx.manager
            .apply_escalation(&conversation.id, "contact asked again", "hello?", None)
            .await
            .expect("second escalation");

        let entries = fx.queue.all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].queue_type, QueueType::Escalated);
        assert_eq!(entries[0].status, QueueEntryStatus::Pending);
        assert_eq!(entries[0].original_message, "help me");

        let stored = fx
            .conversations
            .find_by_id(&conversation.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, ConversationStatus::Escalated);
        assert_eq!(stored.escalation_reason.as_deref(), Some("contact asked for a human"));
        assert!(stored.escalated_at.is_some());
    }

    #[tokio::test]
    async fn not_interested_completes_the_conversation() {
        let fx = fixture();
        let (conversation, _) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("create");

        let updated = fx
            .manager
            .apply_outcome(&conversation.id, ConversationOutcome::NotInterested)
            .await
            .expect("apply outcome");
        assert_eq!(updated.status, ConversationStatus::Completed);
        assert!(updated.completed_at.is_some());

        // The phone is free again for a later trigger.
        let (next, created) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("recreate");
        assert!(created);
        assert_ne!(next.id, conversation.id);
    }

    #[tokio::test]
    async fn booked_outcome_keeps_the_conversation_active() {
        let fx = fixture();
        let (conversation, _) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("create");

        let updated = fx
            .manager
            .apply_outcome(&conversation.id, ConversationOutcome::Booked)
            .await
            .expect("apply outcome");
        assert_eq!(updated.status, ConversationStatus::Active);
        assert_eq!(updated.outcome, Some(ConversationOutcome::Booked));
    }

    #[tokio::test]
    async fn advance_step_is_a_no_op_on_the_current_step() {
        let fx = fixture();
        let (conversation, _) =
            fx.manager.create_or_resume(request("33612345678")).await.expect("create");

        fx.manager.advance_step(&conversation.id, 1).await.expect("same step");
        fx.manager.advance_step(&conversation.id, 3).await.expect("new step");

        let stored = fx
            .conversations
            .find_by_id(&conversation.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.current_step, 3);
    }

    #[tokio::test]
    async fn operations_on_a_missing_conversation_fail_with_not_found() {
        let fx = fixture();
        let missing = cadence_core::domain::conversation::ConversationId("ghost".to_string());
        let error = fx
            .manager
            .apply_outcome(&missing, ConversationOutcome::Contacted)
            .await
            .expect_err("missing conversation");
        assert!(matches!(error, super::LifecycleError::NotFound(_)));
    }
}
