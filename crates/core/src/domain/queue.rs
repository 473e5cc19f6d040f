use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(pub String);

impl QueueEntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    OutsideHours,
    Escalated,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutsideHours => "outside_hours",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "outside_hours" => Some(Self::OutsideHours),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Display priority: escalations surface above deferred replies.
    pub fn priority(&self) -> i64 {
        match self {
            Self::Escalated => 2,
            Self::OutsideHours => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub conversation_id: ConversationId,
    pub queue_type: QueueType,
    pub status: QueueEntryStatus,
    pub priority: i64,
    pub original_message: String,
    pub reason: String,
    pub suggested_response: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn outside_hours(
        conversation_id: ConversationId,
        original_message: impl Into<String>,
        reason: impl Into<String>,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueEntryId::generate(),
            conversation_id,
            queue_type: QueueType::OutsideHours,
            status: QueueEntryStatus::Pending,
            priority: QueueType::OutsideHours.priority(),
            original_message: original_message.into(),
            reason: reason.into(),
            suggested_response: None,
            scheduled_for,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
        }
    }

    pub fn escalated(
        conversation_id: ConversationId,
        original_message: impl Into<String>,
        reason: impl Into<String>,
        suggested_response: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueEntryId::generate(),
            conversation_id,
            queue_type: QueueType::Escalated,
            status: QueueEntryStatus::Pending,
            priority: QueueType::Escalated.priority(),
            original_message: original_message.into(),
            reason: reason.into(),
            suggested_response,
            scheduled_for: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::conversation::ConversationId;

    use super::{QueueEntry, QueueEntryStatus, QueueType};

    #[test]
    fn escalations_outrank_deferred_replies() {
        assert!(QueueType::Escalated.priority() > QueueType::OutsideHours.priority());
    }

    #[test]
    fn outside_hours_entries_carry_a_schedule_hint() {
        let scheduled_for = Utc::now();
        let entry = QueueEntry::outside_hours(
            ConversationId("conv-1".to_string()),
            "still interested?",
            "closed until Monday at 08:00",
            Some(scheduled_for),
            Utc::now(),
        );
        assert_eq!(entry.queue_type, QueueType::OutsideHours);
        assert_eq!(entry.status, QueueEntryStatus::Pending);
        assert_eq!(entry.scheduled_for, Some(scheduled_for));
    }

    #[test]
    fn escalated_entries_have_no_schedule() {
        let entry = QueueEntry::escalated(
            ConversationId("conv-1".to_string()),
            "let me talk to a person",
            "contact asked for a human",
            Some("Connecting you with an advisor now.".to_string()),
            Utc::now(),
        );
        assert_eq!(entry.queue_type, QueueType::Escalated);
        assert!(entry.scheduled_for.is_none());
    }
}
