use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use cadence_core::domain::channel::ChannelId;
use cadence_core::domain::conversation::ConversationId;
use cadence_core::domain::message::{Message, MessageDirection, MessageId, SenderType};
use cadence_db::repositories::{
    ChannelRepository, ConversationRepository, MessageRepository, RepositoryError,
};

use crate::crm::CrmSyncDispatcher;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub success: bool,
    pub transport_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendReceipt {
    pub fn delivered(transport_message_id: Option<String>) -> Self {
        Self { success: true, transport_message_id, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, transport_message_id: None, error: Some(error.into()) }
    }
}

/// Outbound channel gateway. Total: transport problems come back inside the
/// receipt, never as an error.
#[async_trait::async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(&self, channel: &ChannelId, phone: &str, text: &str) -> SendReceipt;
    async fn fetch_profile_picture(&self, channel: &ChannelId, phone: &str) -> Option<String>;
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, base_url: String, api_token: SecretString) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_token }
    }
}

#[derive(Deserialize)]
struct GatewaySendResponse {
    message_id: Option<String>,
}

#[derive(Deserialize)]
struct GatewayProfileResponse {
    url: Option<String>,
}

#[async_trait::async_trait]
impl OutboundTransport for HttpTransport {
    async fn send(&self, channel: &ChannelId, phone: &str, text: &str) -> SendReceipt {
        let request = self
            .http
            .post(format!("{}/instances/{}/messages", self.base_url, channel.0))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "phone": phone, "message": text }));

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return SendReceipt::failed(error.to_string()),
        };
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(error) => return SendReceipt::failed(error.to_string()),
        };
        match response.json::<GatewaySendResponse>().await {
            Ok(body) => SendReceipt::delivered(body.message_id),
            Err(error) => SendReceipt::failed(format!("unreadable gateway response: {error}")),
        }
    }

    async fn fetch_profile_picture(&self, channel: &ChannelId, phone: &str) -> Option<String> {
        let response = self
            .http
            .get(format!("{}/instances/{}/profile-picture", self.base_url, channel.0))
            .bearer_auth(self.api_token.expose_secret())
            .query(&[("phone", phone)])
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        response.json::<GatewayProfileResponse>().await.ok()?.url
    }
}

/// No-op transport for deployments without a configured gateway.
pub struct NoopTransport;

#[async_trait::async_trait]
impl OutboundTransport for NoopTransport {
    async fn send(&self, _channel: &ChannelId, _phone: &str, _text: &str) -> SendReceipt {
        SendReceipt::delivered(None)
    }

    async fn fetch_profile_picture(&self, _channel: &ChannelId, _phone: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("daily send limit reached on channel `{0}`")]
    RateLimitExceeded(String),
    #[error("conversation `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    /// First-contact sends go through the rate governor; replies never do.
    pub is_outreach: bool,
    pub sender: Option<SenderType>,
    pub script_step: Option<i64>,
    /// Applied before the first bubble only. The trigger's configured
    /// warm-up delay for outreach, zero for replies.
    pub first_message_delay: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_ids: Vec<MessageId>,
    pub delivered: usize,
    pub failed: usize,
}

/// Persist-then-send pipeline. Every accepted bubble leaves a Message row
/// behind whatever the transport does; a rate-limited outreach leaves none.
pub struct MessageDeliveryPipeline {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    channels: Arc<dyn ChannelRepository>,
    transport: Arc<dyn OutboundTransport>,
    crm: CrmSyncDispatcher,
    inter_bubble_delay: Duration,
}

impl MessageDeliveryPipeline {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        channels: Arc<dyn ChannelRepository>,
        transport: Arc<dyn OutboundTransport>,
        crm: CrmSyncDispatcher,
        inter_bubble_delay: Duration,
    ) -> Self {
        Self { conversations, messages, channels, transport, crm, inter_bubble_delay }
    }

    pub async fn deliver(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        options: SendOptions,
    ) -> Result<DeliveryReport, DeliveryError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(conversation_id.0.clone()))?;

        // The gate comes before any persistence: a denied outreach must not
        // leave a phantom pending row behind.
        if options.is_outreach
            && !self.channels.try_reserve_send(&conversation.channel_id, Utc::now()).await?
        {
            warn!(
                event_name = "outreach_rate_limited",
                conversation_id = %conversation.id.0,
                channel_id = %conversation.channel_id.0,
                "daily send limit reached, outreach dropped"
            );
            return Err(DeliveryError::RateLimitExceeded(conversation.channel_id.0.clone()));
        }

        let sender = options.sender.unwrap_or(SenderType::Agent);
        let bubbles = split_bubbles(content);
        let mut report =
            DeliveryReport { message_ids: Vec::with_capacity(bubbles.len()), delivered: 0, failed: 0 };

        for (index, bubble) in bubbles.iter().enumerate() {
            let delay =
                if index == 0 { options.first_message_delay } else { self.inter_bubble_delay };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let message = Message::outbound_pending(
                conversation.id.clone(),
                sender,
                bubble.clone(),
                options.script_step,
                Utc::now(),
            );
            let message_id = message.id.clone();
            self.messages.insert(message).await?;

            let receipt =
                self.transport.send(&conversation.channel_id, &conversation.contact_phone, bubble).await;
            let now = Utc::now();
            if receipt.success {
                self.messages.mark_sent(&message_id, receipt.transport_message_id, now).await?;
                report.delivered += 1;
            } else {
                let error = receipt.error.unwrap_or_else(|| "transport send failed".to_string());
                warn!(
                    event_name = "outbound_send_failed",
                    conversation_id = %conversation.id.0,
                    message_id = %message_id.0,
                    error = %error,
                    "outbound send failed"
                );
                self.messages.mark_failed(&message_id, &error, now).await?;
                report.failed += 1;
            }

            self.conversations
                .touch_last_message(&conversation.id, now, sender == SenderType::Agent)
                .await?;
            report.message_ids.push(message_id);
        }

        info!(
            event_name = "delivery_completed",
            conversation_id = %conversation.id.0,
            bubbles = bubbles.len(),
            delivered = report.delivered,
            failed = report.failed,
            "delivery completed"
        );
        self.crm.dispatch_message_log(
            conversation.external_lead_id.as_deref(),
            MessageDirection::Outbound,
            content,
        );

        Ok(report)
    }
}

/// Splits a template into bubbles on lines containing only `---`. Blank
/// bubbles are dropped; a template without the delimiter is one bubble.
pub fn split_bubbles(content: &str) -> Vec<String> {
    let mut bubbles = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim() == "---" {
            if !current.trim().is_empty() {
                bubbles.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        bubbles.push(current.trim().to_string());
    }

    if bubbles.is_empty() {
        bubbles.push(content.trim().to_string());
    }
    bubbles
}
