use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use cadence_core::domain::conversation::{ConversationId, NewConversation};
use cadence_core::domain::message::SenderType;
use cadence_core::domain::trigger::{Trigger, TriggerId};
use cadence_core::{filters, providers};
use cadence_db::repositories::{RepositoryError, TriggerRepository};

use crate::delivery::{DeliveryError, MessageDeliveryPipeline, SendOptions};
use crate::inbound::{InboundError, InboundOutcome, InboundProcessor};
use crate::lifecycle::{ConversationLifecycleManager, LifecycleError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("trigger `{0}` not found")]
    NotFound(String),
    #[error("webhook secret mismatch")]
    Unauthorized,
    #[error("trigger `{0}` is not active")]
    InactiveTrigger(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Inbound(#[from] InboundError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Event matched; a conversation exists and outreach was attempted.
    Accepted { conversation_id: ConversationId, created: bool },
    /// Event authenticated but did not satisfy the trigger's filters. This is
    /// routine traffic, not an error.
    Filtered { reason: Option<String> },
}

/// Webhook boundary: authenticates the call, filters the event, and turns it
/// into a conversation plus the first outreach message.
pub struct TriggerIngestor {
    triggers: Arc<dyn TriggerRepository>,
    lifecycle: Arc<ConversationLifecycleManager>,
    pipeline: Arc<MessageDeliveryPipeline>,
    inbound: Arc<InboundProcessor>,
}

impl TriggerIngestor {
    pub fn new(
        triggers: Arc<dyn TriggerRepository>,
        lifecycle: Arc<ConversationLifecycleManager>,
        pipeline: Arc<MessageDeliveryPipeline>,
        inbound: Arc<InboundProcessor>,
    ) -> Self {
        Self { triggers, lifecycle, pipeline, inbound }
    }

    pub async fn ingest(
        &self,
        trigger_id: &TriggerId,
        secret: &str,
        payload: &Value,
    ) -> Result<IngestOutcome, IngestError> {
        let trigger = self.authenticate(trigger_id, secret).await?;

        let verdict = filters::evaluate(
            trigger.provider_type,
            &trigger.trigger_event,
            &trigger.event_filters,
            payload,
        );
        if !verdict.matches {
            info!(
                event_name = "event_filtered",
                trigger_id = %trigger.id.0,
                reason = verdict.reason.as_deref().unwrap_or(""),
                "event did not satisfy trigger filters"
            );
            return Ok(IngestOutcome::Filtered { reason: verdict.reason });
        }

        let phone = required_phone(payload)?;
        let contact = providers::extract_contact(trigger.provider_type, payload);

        let (conversation, created) = self
            .lifecycle
            .create_or_resume(NewConversation {
                tenant_id: trigger.tenant_id.clone(),
                channel_id: trigger.channel_id.clone(),
                agent_id: trigger.agent_id.clone(),
                trigger_id: Some(trigger.id.clone()),
                contact_phone: phone,
                contact_name: contact.name,
                external_lead_id: contact.external_id,
            })
            .await?;

        if let Err(error) = self.triggers.record_fire(&trigger.id, created).await {
            warn!(
                event_name = "trigger_counter_update_failed",
                trigger_id = %trigger.id.0,
                error = %error,
                "trigger counters not updated"
            );
        }

        if created {
            let first_message =
                render_template(&trigger.first_message_template, conversation.contact_name.as_deref());
            let options = SendOptions {
                is_outreach: true,
                sender: Some(SenderType::Agent),
                script_step: Some(1),
                first_message_delay: Duration::from_secs(u64::from(
                    trigger.first_message_delay_seconds,
                )),
            };
            match self.pipeline.deliver(&conversation.id, &first_message, options).await {
                Ok(_) => {}
                // The event itself was handled; a rate-limited outreach is
                // logged and dropped, never bounced back to the CRM.
                Err(DeliveryError::RateLimitExceeded(channel_id)) => {
                    warn!(
                        event_name = "outreach_dropped_rate_limited",
                        trigger_id = %trigger.id.0,
                        conversation_id = %conversation.id.0,
                        channel_id = %channel_id,
                        "first message dropped, channel at its daily cap"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(IngestOutcome::Accepted { conversation_id: conversation.id, created })
    }

    /// Inbound contact reply arriving through the trigger's webhook: same
    /// authentication, then the inbound processing path. Creates the
    /// conversation when the contact has no active one.
    pub async fn ingest_reply(
        &self,
        trigger_id: &TriggerId,
        secret: &str,
        phone: &str,
        text: &str,
    ) -> Result<(ConversationId, InboundOutcome), IngestError> {
        let trigger = self.authenticate(trigger_id, secret).await?;

        let normalized = providers::normalize_phone(phone);
        if normalized.is_empty() {
            return Err(IngestError::Validation("phone has no digits".to_string()));
        }
        if text.trim().is_empty() {
            return Err(IngestError::Validation("message text is empty".to_string()));
        }

        let (conversation, _) = self
            .lifecycle
            .create_or_resume(NewConversation {
                tenant_id: trigger.tenant_id.clone(),
                channel_id: trigger.channel_id.clone(),
                agent_id: trigger.agent_id.clone(),
                trigger_id: Some(trigger.id.clone()),
                contact_phone: normalized,
                contact_name: None,
                external_lead_id: None,
            })
            .await?;

        let outcome = self.inbound.process(&conversation.id, text).await?;
        Ok((conversation.id, outcome))
    }

    async fn authenticate(
        &self,
        trigger_id: &TriggerId,
        secret: &str,
    ) -> Result<Trigger, IngestError> {
        let trigger = self
            .triggers
            .find_by_id(trigger_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(trigger_id.0.clone()))?;
        if !trigger.verify_secret(secret) {
            return Err(IngestError::Unauthorized);
        }
        if !trigger.is_active {
            return Err(IngestError::InactiveTrigger(trigger.id.0.clone()));
        }
        Ok(trigger)
    }
}

fn required_phone(payload: &Value) -> Result<String, IngestError> {
    let raw = payload
        .get("phone")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| IngestError::Validation("missing required field `phone`".to_string()))?;

    let normalized = providers::normalize_phone(raw);
    if normalized.is_empty() {
        return Err(IngestError::Validation(format!("phone `{raw}` has no digits")));
    }
    Ok(normalized)
}

/// `{{name}}` substitution with a neutral fallback when the payload carried
/// no usable contact name.
fn render_template(template: &str, contact_name: Option<&str>) -> String {
    let name = contact_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| name.split_whitespace().next().unwrap_or(name))
        .unwrap_or("there");
    template.replace("{{name}}", name)
}
