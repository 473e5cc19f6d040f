use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use cadence_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use cadence_core::domain::message::Message;
use cadence_core::domain::queue::{QueueEntry, QueueEntryId};
use cadence_core::hours;
use cadence_db::repositories::{
    ConversationRepository, MessageRepository, QueueRepository, RepositoryError,
    ScheduleRepository,
};

use crate::delivery::{DeliveryError, MessageDeliveryPipeline, SendOptions};
use crate::lifecycle::{ConversationLifecycleManager, LifecycleError};
use crate::respond::ResponseGenerator;

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("conversation `{0}` not found")]
    NotFound(String),
    #[error("conversation `{0}` is not active")]
    NotActive(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A reply went out through the delivery pipeline.
    Replied,
    /// Working hours were closed; the message waits in the queue.
    Queued { entry_id: QueueEntryId },
    /// The responder escalated; a human picks it up from the queue.
    Escalated,
    /// The conversation is no longer active; the message was recorded only.
    Ignored,
}

/// Handles a contact's reply: records it, gates on working hours, and either
/// answers through the responder or defers the message.
pub struct InboundProcessor {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    queue: Arc<dyn QueueRepository>,
    lifecycle: Arc<ConversationLifecycleManager>,
    pipeline: Arc<MessageDeliveryPipeline>,
    responder: Arc<dyn ResponseGenerator>,
}

impl InboundProcessor {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        queue: Arc<dyn QueueRepository>,
        lifecycle: Arc<ConversationLifecycleManager>,
        pipeline: Arc<MessageDeliveryPipeline>,
        responder: Arc<dyn ResponseGenerator>,
    ) -> Self {
        Self { conversations, messages, schedules, queue, lifecycle, pipeline, responder }
    }

    /// Full inbound path for a fresh contact message. The scheduler re-injects
    /// deferred messages through [`InboundProcessor::respond`] instead so the
    /// original message is not recorded twice.
    pub async fn process(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<InboundOutcome, InboundError> {
        let conversation = self.load(conversation_id).await?;

        let now = Utc::now();
        self.messages.insert(Message::inbound(conversation.id.clone(), text, now)).await?;
        self.conversations.touch_last_message(&conversation.id, now, false).await?;

        if conversation.status != ConversationStatus::Active {
            info!(
                event_name = "inbound_ignored",
                conversation_id = %conversation.id.0,
                status = conversation.status.as_str(),
                "inbound message recorded on a non-active conversation"
            );
            return Ok(InboundOutcome::Ignored);
        }

        let schedule = match conversation.agent_id.as_deref() {
            Some(agent_id) => self.schedules.find_for_agent(agent_id).await?,
            None => None,
        };
        let verdict = hours::is_open(schedule.as_ref(), now);
        if !verdict.is_open {
            let reason = match verdict.next_open_description.as_deref() {
                Some(next_open) => format!("outside working hours, reopens {next_open}"),
                None => "outside working hours".to_string(),
            };
            let entry = QueueEntry::outside_hours(
                conversation.id.clone(),
                text,
                reason,
                verdict.next_open,
                now,
            );
            let entry_id = entry.id.clone();
            self.queue.insert(entry).await?;
            info!(
                event_name = "inbound_deferred",
                conversation_id = %conversation.id.0,
                entry_id = %entry_id.0,
                "inbound message deferred until working hours reopen"
            );
            return Ok(InboundOutcome::Queued { entry_id });
        }

        self.answer(&conversation, text).await
    }

    /// Responder path only: generate and deliver a reply for an already
    /// recorded inbound message. Requires an active conversation.
    pub async fn respond(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<InboundOutcome, InboundError> {
        let conversation = self.load(conversation_id).await?;
        if conversation.status != ConversationStatus::Active {
            return Err(InboundError::NotActive(conversation.id.0.clone()));
        }
        self.answer(&conversation, text).await
    }

    async fn answer(
        &self,
        conversation: &Conversation,
        text: &str,
    ) -> Result<InboundOutcome, InboundError> {
        let history = self.messages.list_for_conversation(&conversation.id).await?;
        let reply = self.responder.generate_reply(conversation, &history, text).await;

        if reply.should_escalate {
            let reason = reply
                .escalation_reason
                .unwrap_or_else(|| "automated responder requested escalation".to_string());
            let suggested = if reply.text.is_empty() { None } else { Some(reply.text) };
            self.lifecycle
                .apply_escalation(&conversation.id, &reason, text, suggested)
                .await?;
            return Ok(InboundOutcome::Escalated);
        }

        self.pipeline
            .deliver(
                &conversation.id,
                &reply.text,
                SendOptions { script_step: Some(conversation.current_step), ..SendOptions::default() },
            )
            .await?;

        if let Some(outcome) = reply.outcome {
            self.lifecycle.apply_outcome(&conversation.id, outcome).await?;
        }
        if let Some(next_step) = reply.next_step {
            self.lifecycle.advance_step(&conversation.id, next_step).await?;
        }

        Ok(InboundOutcome::Replied)
    }

    async fn load(&self, id: &ConversationId) -> Result<Conversation, InboundError> {
        self.conversations
            .find_by_id(id)
            .await?
            .ok_or_else(|| InboundError::NotFound(id.0.clone()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use cadence_db::repositories::{
        ChannelRepository, ConversationRepository, InMemoryChannelRepository,
        InMemoryConversationRepository, InMemoryMessageRepository, InMemoryQueueRepository,
        InMemoryScheduleRepository, MessageRepository, QueueRepository, ScheduleRepository,
    };

    use crate::crm::CrmSyncDispatcher;
    use crate::delivery::testing::RecordingTransport;
    use crate::delivery::{MessageDeliveryPipeline, OutboundTransport};
    use crate::lifecycle::ConversationLifecycleManager;
    use crate::respond::{ResponseGenerator, ScriptedResponder};

    use super::InboundProcessor;

    /// Shared wiring for engine-level scenario tests.
    pub struct EngineFixture {
        pub conversations: Arc<InMemoryConversationRepository>,
        pub messages: Arc<InMemoryMessageRepository>,
        pub channels: Arc<InMemoryChannelRepository>,
        pub queue: Arc<InMemoryQueueRepository>,
        pub schedules: Arc<InMemoryScheduleRepository>,
        pub transport: Arc<RecordingTransport>,
        pub lifecycle: Arc<ConversationLifecycleManager>,
        pub pipeline: Arc<MessageDeliveryPipeline>,
        pub inbound: Arc<InboundProcessor>,
    }

    pub fn engine_fixture() -> EngineFixture {
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let messages = Arc::new(InMemoryMessageRepository::new());
        let channels = Arc::new(InMemoryChannelRepository::new());
        let queue = Arc::new(InMemoryQueueRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let transport = Arc::new(RecordingTransport::default());

        let lifecycle = Arc::new(ConversationLifecycleManager::new(
            Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            Arc::clone(&queue) as Arc<dyn QueueRepository>,
            CrmSyncDispatcher::disabled(),
        ));
        let pipeline = Arc::new(MessageDeliveryPipeline::new(
            Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            Arc::clone(&messages) as Arc<dyn MessageRepository>,
            Arc::clone(&channels) as Arc<dyn ChannelRepository>,
            Arc::clone(&transport) as Arc<dyn OutboundTransport>,
            CrmSyncDispatcher::disabled(),
            Duration::ZERO,
        ));
        let inbound = Arc::new(InboundProcessor::new(
            Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            Arc::clone(&messages) as Arc<dyn MessageRepository>,
            Arc::clone(&schedules) as Arc<dyn ScheduleRepository>,
            Arc::clone(&queue) as Arc<dyn QueueRepository>,
            Arc::clone(&lifecycle),
            Arc::clone(&pipeline),
            Arc::new(ScriptedResponder::default()) as Arc<dyn ResponseGenerator>,
        ));

        EngineFixture {
            conversations,
            messages,
            channels,
            queue,
            schedules,
            transport,
            lifecycle,
            pipeline,
            inbound,
        }
    }
}
