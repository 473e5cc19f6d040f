use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Agent,
    Human,
    Contact,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
            Self::Contact => "contact",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "agent" => Some(Self::Agent),
            "human" => Some(Self::Human),
            "contact" => Some(Self::Contact),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub direction: MessageDirection,
    pub sender_type: SenderType,
    pub content: String,
    pub status: MessageStatus,
    pub script_step_used: Option<i64>,
    pub channel_message_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Outbound messages are persisted as `pending` before the transport call
    /// so a record exists even if the send never completes.
    pub fn outbound_pending(
        conversation_id: ConversationId,
        sender_type: SenderType,
        content: impl Into<String>,
        script_step_used: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            direction: MessageDirection::Outbound,
            sender_type,
            content: content.into(),
            status: MessageStatus::Pending,
            script_step_used,
            channel_message_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Inbound messages have already been delivered by the contact's channel,
    /// so they are recorded as `sent` directly.
    pub fn inbound(
        conversation_id: ConversationId,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            direction: MessageDirection::Inbound,
            sender_type: SenderType::Contact,
            content: content.into(),
            status: MessageStatus::Sent,
            script_step_used: None,
            channel_message_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}
