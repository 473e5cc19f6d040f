use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::channel::ChannelId;
use crate::domain::trigger::TriggerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Completed,
    Disqualified,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Escalated => "escalated",
            Self::Completed => "completed",
            Self::Disqualified => "disqualified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "escalated" => Some(Self::Escalated),
            "completed" => Some(Self::Completed),
            "disqualified" => Some(Self::Disqualified),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationOutcome {
    Contacted,
    Qualified,
    Booked,
    NotInterested,
    Escalated,
}

impl ConversationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Booked => "booked",
            Self::NotInterested => "not_interested",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "contacted" => Some(Self::Contacted),
            "qualified" => Some(Self::Qualified),
            "booked" => Some(Self::Booked),
            "not_interested" => Some(Self::NotInterested),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// Inputs for starting a conversation. The contact phone is expected to be
/// normalized (digits only) before it reaches this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewConversation {
    pub tenant_id: String,
    pub channel_id: ChannelId,
    pub agent_id: Option<String>,
    pub trigger_id: Option<TriggerId>,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub external_lead_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: String,
    pub channel_id: ChannelId,
    pub agent_id: Option<String>,
    pub trigger_id: Option<TriggerId>,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub external_lead_id: Option<String>,
    pub status: ConversationStatus,
    pub current_step: i64,
    pub outcome: Option<ConversationOutcome>,
    pub escalation_reason: Option<String>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_agent_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn start(request: NewConversation, now: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::generate(),
            tenant_id: request.tenant_id,
            channel_id: request.channel_id,
            agent_id: request.agent_id,
            trigger_id: request.trigger_id,
            contact_phone: request.contact_phone,
            contact_name: request.contact_name,
            external_lead_id: request.external_lead_id,
            status: ConversationStatus::Active,
            current_step: 1,
            outcome: None,
            escalation_reason: None,
            escalated_at: None,
            completed_at: None,
            last_message_at: None,
            last_agent_message_at: None,
            created_at: now,
        }
    }

    /// Terminal states never return to `Active`; a human resolving an
    /// escalation resolves the queue entry, not the conversation.
    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self.status, next),
            (ConversationStatus::Active, ConversationStatus::Escalated)
                | (ConversationStatus::Active, ConversationStatus::Completed)
                | (ConversationStatus::Active, ConversationStatus::Disqualified)
        )
    }

    pub fn transition_to(&mut self, next: ConversationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidConversationTransition { from: self.status, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::channel::ChannelId;

    use super::{Conversation, ConversationStatus, NewConversation};

    fn conversation(status: ConversationStatus) -> Conversation {
        let mut conversation = Conversation::start(
            NewConversation {
                tenant_id: "tenant-1".to_string(),
                channel_id: ChannelId("wa-main".to_string()),
                agent_id: None,
                trigger_id: None,
                contact_phone: "33612345678".to_string(),
                contact_name: Some("Lea Martin".to_string()),
                external_lead_id: None,
            },
            Utc::now(),
        );
        conversation.status = status;
        conversation
    }

    #[test]
    fn new_conversations_start_active_at_step_one() {
        let conversation = conversation(ConversationStatus::Active);
        assert_eq!(conversation.status, ConversationStatus::Active);
        assert_eq!(conversation.current_step, 1);
        assert!(conversation.outcome.is_none());
    }

    #[test]
    fn active_conversations_can_escalate_complete_or_disqualify() {
        for next in [
            ConversationStatus::Escalated,
            ConversationStatus::Completed,
            ConversationStatus::Disqualified,
        ] {
            let mut conversation = conversation(ConversationStatus::Active);
            conversation.transition_to(next).expect("active should reach terminal state");
            assert_eq!(conversation.status, next);
        }
    }

    #[test]
    fn terminal_states_never_return_to_active() {
        for terminal in [
            ConversationStatus::Escalated,
            ConversationStatus::Completed,
            ConversationStatus::Disqualified,
        ] {
            let mut conversation = conversation(terminal);
            let error = conversation
                .transition_to(ConversationStatus::Active)
                .expect_err("terminal -> active should fail");
            assert!(matches!(
                error,
                crate::errors::DomainError::InvalidConversationTransition { .. }
            ));
        }
    }

    #[test]
    fn escalated_conversations_do_not_complete_automatically() {
        let mut conversation = conversation(ConversationStatus::Escalated);
        assert!(conversation.transition_to(ConversationStatus::Completed).is_err());
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            ConversationStatus::Active,
            ConversationStatus::Escalated,
            ConversationStatus::Completed,
            ConversationStatus::Disqualified,
        ] {
            assert_eq!(ConversationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ConversationStatus::parse("archived"), None);
    }
}
