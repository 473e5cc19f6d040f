use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use cadence_core::domain::trigger::TriggerId;
use cadence_engine::{InboundOutcome, IngestError, IngestOutcome, TriggerIngestor};

const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct WebhookState {
    pub ingestor: Arc<TriggerIngestor>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessageRequest {
    pub phone: String,
    pub message: String,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/{trigger_id}", post(receive_event))
        .route("/webhook/{trigger_id}/inbound", post(receive_inbound))
        .with_state(state)
}

pub async fn receive_event(
    State(state): State<WebhookState>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<WebhookResponse>) {
    let secret = presented_secret(&headers);
    let result = state.ingestor.ingest(&TriggerId(trigger_id), &secret, &payload).await;

    match result {
        Ok(IngestOutcome::Accepted { conversation_id, .. }) => (
            StatusCode::OK,
            Json(WebhookResponse {
                success: true,
                conversation_id: Some(conversation_id.0),
                ..WebhookResponse::default()
            }),
        ),
        Ok(IngestOutcome::Filtered { reason }) => (
            StatusCode::OK,
            Json(WebhookResponse {
                success: true,
                filtered: Some(true),
                reason,
                ..WebhookResponse::default()
            }),
        ),
        Err(error) => error_response(error),
    }
}

pub async fn receive_inbound(
    State(state): State<WebhookState>,
    Path(trigger_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<InboundMessageRequest>,
) -> (StatusCode, Json<WebhookResponse>) {
    let secret = presented_secret(&headers);
    let result = state
        .ingestor
        .ingest_reply(&TriggerId(trigger_id), &secret, &request.phone, &request.message)
        .await;

    match result {
        Ok((conversation_id, outcome)) => (
            StatusCode::OK,
            Json(WebhookResponse {
                success: true,
                conversation_id: Some(conversation_id.0),
                outcome: Some(outcome_label(&outcome)),
                ..WebhookResponse::default()
            }),
        ),
        Err(error) => error_response(error),
    }
}

fn outcome_label(outcome: &InboundOutcome) -> &'static str {
    match outcome {
        InboundOutcome::Replied => "replied",
        InboundOutcome::Queued { .. } => "queued",
        InboundOutcome::Escalated => "escalated",
        InboundOutcome::Ignored => "ignored",
    }
}

fn presented_secret(headers: &HeaderMap) -> String {
    headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn error_response(error: IngestError) -> (StatusCode, Json<WebhookResponse>) {
    let status = match &error {
        IngestError::NotFound(_) => StatusCode::NOT_FOUND,
        IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
        IngestError::InactiveTrigger(_) | IngestError::Validation(_) => StatusCode::BAD_REQUEST,
        IngestError::Repository(_)
        | IngestError::Lifecycle(_)
        | IngestError::Delivery(_)
        | IngestError::Inbound(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(event_name = "webhook_ingest_failed", error = %error, "webhook ingest failed");
    }
    (
        status,
        Json(WebhookResponse {
            success: false,
            error: Some(error.to_string()),
            ..WebhookResponse::default()
        }),
    )
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        extract::{Path, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        Json,
    };
    use serde_json::json;

    use super::testing::{handler_fixture, seed_trigger_and_channel};
    use super::{receive_event, receive_inbound, InboundMessageRequest, WebhookState};

    fn secret_headers(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-secret", HeaderValue::from_str(secret).expect("header value"));
        headers
    }

    #[tokio::test]
    async fn matching_event_returns_the_conversation_id() {
        let fixture = handler_fixture();
        seed_trigger_and_channel(&fixture).await;
        let state = WebhookState { ingestor: Arc::clone(&fixture.ingestor) };

        let (status, Json(body)) = receive_event(
            State(state),
            Path("trg-1".to_string()),
            secret_headers("whsec_abc"),
            Json(json!({ "phone": "33612345678", "name": "Lea" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert!(body.conversation_id.is_some());
        assert!(body.filtered.is_none());
    }

    #[tokio::test]
    async fn bad_secret_is_unauthorized() {
        let fixture = handler_fixture();
        seed_trigger_and_channel(&fixture).await;
        let state = WebhookState { ingestor: Arc::clone(&fixture.ingestor) };

        let (status, Json(body)) = receive_event(
            State(state),
            Path("trg-1".to_string()),
            secret_headers("wrong"),
            Json(json!({ "phone": "33612345678" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn unknown_trigger_is_not_found_and_missing_phone_is_bad_request() {
        let fixture = handler_fixture();
        seed_trigger_and_channel(&fixture).await;

        let (status, _) = receive_event(
            State(WebhookState { ingestor: Arc::clone(&fixture.ingestor) }),
            Path("ghost".to_string()),
            secret_headers("whsec_abc"),
            Json(json!({ "phone": "33612345678" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, Json(body)) = receive_event(
            State(WebhookState { ingestor: Arc::clone(&fixture.ingestor) }),
            Path("trg-1".to_string()),
            secret_headers("whsec_abc"),
            Json(json!({ "name": "Lea" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.unwrap_or_default().contains("phone"));
    }

    #[tokio::test]
    async fn inbound_replies_report_their_processing_outcome() {
        let fixture = handler_fixture();
        seed_trigger_and_channel(&fixture).await;
        let state = WebhookState { ingestor: Arc::clone(&fixture.ingestor) };

        let (status, Json(body)) = receive_inbound(
            State(state),
            Path("trg-1".to_string()),
            secret_headers("whsec_abc"),
            Json(InboundMessageRequest {
                phone: "+33612345678".to_string(),
                message: "yes, tell me more".to_string(),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.outcome, Some("replied"));
        assert!(body.conversation_id.is_some());
    }
}
