use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::channel::ChannelId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerId(pub String);

/// Closed set of supported event sources. Filter schemas and contact
/// extraction are keyed off this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Pipedrive,
    Hubspot,
    Calendly,
    Webhook,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipedrive => "pipedrive",
            Self::Hubspot => "hubspot",
            Self::Calendly => "calendly",
            Self::Webhook => "webhook",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pipedrive" => Some(Self::Pipedrive),
            "hubspot" => Some(Self::Hubspot),
            "calendly" => Some(Self::Calendly),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub tenant_id: String,
    pub provider_type: ProviderType,
    pub webhook_secret: String,
    pub is_active: bool,
    pub trigger_event: String,
    pub event_filters: BTreeMap<String, Value>,
    pub channel_id: ChannelId,
    pub agent_id: Option<String>,
    pub first_message_template: String,
    pub first_message_delay_seconds: u32,
    pub total_triggered: i64,
    pub total_conversations: i64,
    pub total_bookings: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    pub fn verify_secret(&self, presented: &str) -> bool {
        !self.webhook_secret.is_empty() && self.webhook_secret == presented
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::domain::channel::ChannelId;

    use super::{ProviderType, Trigger, TriggerId};

    fn trigger(secret: &str) -> Trigger {
        Trigger {
            id: TriggerId("trg-1".to_string()),
            tenant_id: "tenant-1".to_string(),
            provider_type: ProviderType::Pipedrive,
            webhook_secret: secret.to_string(),
            is_active: true,
            trigger_event: "deal.updated".to_string(),
            event_filters: BTreeMap::new(),
            channel_id: ChannelId("wa-main".to_string()),
            agent_id: None,
            first_message_template: "Hello {{name}}".to_string(),
            first_message_delay_seconds: 0,
            total_triggered: 0,
            total_conversations: 0,
            total_bookings: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn secret_must_match_exactly() {
        let trigger = trigger("whsec_123");
        assert!(trigger.verify_secret("whsec_123"));
        assert!(!trigger.verify_secret("whsec_124"));
        assert!(!trigger.verify_secret(""));
    }

    #[test]
    fn empty_stored_secret_rejects_everything() {
        let trigger = trigger("");
        assert!(!trigger.verify_secret(""));
    }

    #[test]
    fn provider_tags_round_trip() {
        for provider in [
            ProviderType::Pipedrive,
            ProviderType::Hubspot,
            ProviderType::Calendly,
            ProviderType::Webhook,
        ] {
            assert_eq!(ProviderType::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(ProviderType::parse("salesforce"), None);
    }
}
