use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Banned,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Banned => "banned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

/// A WhatsApp account used for outbound sends. `messages_sent_today` is reset
/// externally at the day boundary; this model only enforces the cap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub instance_id: ChannelId,
    pub tenant_id: String,
    pub daily_limit: i64,
    pub messages_sent_today: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub status: ChannelStatus,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn has_daily_budget(&self) -> bool {
        self.messages_sent_today < self.daily_limit
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Channel, ChannelId, ChannelStatus};

    fn channel(sent: i64, limit: i64) -> Channel {
        Channel {
            instance_id: ChannelId("wa-main".to_string()),
            tenant_id: "tenant-1".to_string(),
            daily_limit: limit,
            messages_sent_today: sent,
            last_message_at: None,
            status: ChannelStatus::Connected,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn budget_is_exhausted_at_the_limit() {
        assert!(channel(4, 5).has_daily_budget());
        assert!(!channel(5, 5).has_daily_budget());
        assert!(!channel(6, 5).has_daily_budget());
    }
}
