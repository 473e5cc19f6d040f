//! CRM synchronization. Every call is best-effort: the dispatcher spawns
//! detached tasks and failures are logged, never propagated, so a slow or
//! broken CRM can never block message delivery.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use cadence_core::domain::conversation::ConversationOutcome;
use cadence_core::domain::message::MessageDirection;

#[derive(Debug, Error)]
pub enum SyncFailure {
    #[error("crm request failed: {0}")]
    Request(String),
    #[error("crm returned an unexpected response: {0}")]
    Response(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrmContact {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCrmRecord {
    pub phone: String,
    pub name: Option<String>,
    pub source: Option<String>,
}

#[async_trait::async_trait]
pub trait CrmClient: Send + Sync {
    async fn find_contact(&self, phone: &str) -> Result<Option<CrmContact>, SyncFailure>;
    async fn create_record(&self, record: NewCrmRecord) -> Result<String, SyncFailure>;
    async fn update_status(
        &self,
        record_id: &str,
        outcome: ConversationOutcome,
    ) -> Result<(), SyncFailure>;
    async fn log_message(
        &self,
        record_id: &str,
        direction: MessageDirection,
        content: &str,
    ) -> Result<(), SyncFailure>;
}

pub struct NoopCrmClient;

#[async_trait::async_trait]
impl CrmClient for NoopCrmClient {
    async fn find_contact(&self, _phone: &str) -> Result<Option<CrmContact>, SyncFailure> {
        Ok(None)
    }

    async fn create_record(&self, _record: NewCrmRecord) -> Result<String, SyncFailure> {
        Ok(String::new())
    }

    async fn update_status(
        &self,
        _record_id: &str,
        _outcome: ConversationOutcome,
    ) -> Result<(), SyncFailure> {
        Ok(())
    }

    async fn log_message(
        &self,
        _record_id: &str,
        _direction: MessageDirection,
        _content: &str,
    ) -> Result<(), SyncFailure> {
        Ok(())
    }
}

pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpCrmClient {
    pub fn new(http: reqwest::Client, base_url: String, api_token: SecretString) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_token }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[derive(Deserialize)]
struct ContactSearchResponse {
    contact: Option<ContactPayload>,
}

#[derive(Deserialize)]
struct ContactPayload {
    id: String,
    name: Option<String>,
    phone: Option<String>,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    id: String,
}

#[async_trait::async_trait]
impl CrmClient for HttpCrmClient {
    async fn find_contact(&self, phone: &str) -> Result<Option<CrmContact>, SyncFailure> {
        let response = self
            .http
            .get(self.url("/contacts/search"))
            .bearer_auth(self.api_token.expose_secret())
            .query(&[("phone", phone)])
            .send()
            .await
            .map_err(|error| SyncFailure::Request(error.to_string()))?;

        let body: ContactSearchResponse = response
            .error_for_status()
            .map_err(|error| SyncFailure::Request(error.to_string()))?
            .json()
            .await
            .map_err(|error| SyncFailure::Response(error.to_string()))?;

        Ok(body.contact.map(|contact| CrmContact {
            id: contact.id,
            name: contact.name,
            phone: contact.phone,
        }))
    }

    async fn create_record(&self, record: NewCrmRecord) -> Result<String, SyncFailure> {
        let response = self
            .http
            .post(self.url("/records"))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({
                "phone": record.phone,
                "name": record.name,
                "source": record.source,
            }))
            .send()
            .await
            .map_err(|error| SyncFailure::Request(error.to_string()))?;

        let body: CreateRecordResponse = response
            .error_for_status()
            .map_err(|error| SyncFailure::Request(error.to_string()))?
            .json()
            .await
            .map_err(|error| SyncFailure::Response(error.to_string()))?;

        Ok(body.id)
    }

    async fn update_status(
        &self,
        record_id: &str,
        outcome: ConversationOutcome,
    ) -> Result<(), SyncFailure> {
        self.http
            .post(self.url(&format!("/records/{record_id}/status")))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "outcome": outcome.as_str() }))
            .send()
            .await
            .map_err(|error| SyncFailure::Request(error.to_string()))?
            .error_for_status()
            .map_err(|error| SyncFailure::Request(error.to_string()))?;
        Ok(())
    }

    async fn log_message(
        &self,
        record_id: &str,
        direction: MessageDirection,
        content: &str,
    ) -> Result<(), SyncFailure> {
        self.http
            .post(self.url(&format!("/records/{record_id}/messages")))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "direction": direction.as_str(), "content": content }))
            .send()
            .await
            .map_err(|error| SyncFailure::Request(error.to_string()))?
            .error_for_status()
            .map_err(|error| SyncFailure::Request(error.to_string()))?;
        Ok(())
    }
}

/// Fans CRM writes out as detached tasks. A disabled dispatcher drops
/// everything silently, as does any call without an external record id.
#[derive(Clone)]
pub struct CrmSyncDispatcher {
    client: Arc<dyn CrmClient>,
    enabled: bool,
}

impl CrmSyncDispatcher {
    pub fn new(client: Arc<dyn CrmClient>) -> Self {
        Self { client, enabled: true }
    }

    pub fn disabled() -> Self {
        Self { client: Arc::new(NoopCrmClient), enabled: false }
    }

    pub fn dispatch_status(&self, record_id: Option<&str>, outcome: ConversationOutcome) {
        if !self.enabled {
            return;
        }
        let Some(record_id) = record_id.map(str::to_string) else {
            return;
        };
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            if let Err(error) = client.update_status(&record_id, outcome).await {
                warn!(
                    event_name = "crm_status_sync_failed",
                    record_id = %record_id,
                    error = %error,
                    "CRM status update failed"
                );
            }
        });
    }

    pub fn dispatch_message_log(
        &self,
        record_id: Option<&str>,
        direction: MessageDirection,
        content: &str,
    ) {
        if !self.enabled {
            return;
        }
        let Some(record_id) = record_id.map(str::to_string) else {
            return;
        };
        let content = content.to_string();
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            if let Err(error) = client.log_message(&record_id, direction, &content).await {
                warn!(
                    event_name = "crm_message_log_failed",
                    record_id = %record_id,
                    error = %error,
                    "CRM message log failed"
                );
            }
        });
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use cadence_core::domain::conversation::ConversationOutcome;
    use cadence_core::domain::message::MessageDirection;

    use super::{CrmClient, CrmContact, NewCrmRecord, SyncFailure};

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum CrmCall {
        UpdateStatus { record_id: String, outcome: ConversationOutcome },
        LogMessage { record_id: String, direction: MessageDirection, content: String },
    }

    #[derive(Default)]
    pub struct RecordingCrmClient {
        pub calls: Mutex<Vec<CrmCall>>,
    }

    #[async_trait::async_trait]
    impl CrmClient for RecordingCrmClient {
        async fn find_contact(&self, _phone: &str) -> Result<Option<CrmContact>, SyncFailure> {
            Ok(None)
        }

        async fn create_record(&self, record: NewCrmRecord) -> Result<String, SyncFailure> {
            Ok(format!("rec-{}", record.phone))
        }

        async fn update_status(
            &self,
            record_id: &str,
            outcome: ConversationOutcome,
        ) -> Result<(), SyncFailure> {
            self.calls.lock().unwrap().push(CrmCall::UpdateStatus {
                record_id: record_id.to_string(),
                outcome,
            });
            Ok(())
        }

        async fn log_message(
            &self,
            record_id: &str,
            direction: MessageDirection,
            content: &str,
        ) -> Result<(), SyncFailure> {
            self.calls.lock().unwrap().push(CrmCall::LogMessage {
                record_id: record_id.to_string(),
                direction,
                content: content.to_string(),
            });
            Ok(())
        }
    }
}
