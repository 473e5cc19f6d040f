use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use cadence_core::domain::channel::ChannelId;
use cadence_core::domain::queue::QueueEntryId;
use cadence_core::providers::normalize_phone;
use cadence_db::repositories::{ChannelRepository, QueueRepository, RepositoryError};
use cadence_engine::OutboundTransport;

/// Human-facing admin surface: queue resolution and manual test sends.
#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<dyn QueueRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub transport: Arc<dyn OutboundTransport>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolved_by: String,
}

#[derive(Debug, Deserialize)]
pub struct TestMessageRequest {
    pub phone: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/queue/{entry_id}/resolve", post(resolve_entry))
        .route("/api/v1/queue/{entry_id}/dismiss", post(dismiss_entry))
        .route("/api/v1/channels/{channel_id}/test-message", post(send_test_message))
        .with_state(state)
}

/// Marks an entry resolved. Deliberately does not touch the conversation:
/// closing an escalation is queue bookkeeping, reactivation stays a separate
/// human decision.
pub async fn resolve_entry(
    State(state): State<ApiState>,
    Path(entry_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    close_entry(&state, &entry_id, &request.resolved_by, true).await
}

pub async fn dismiss_entry(
    State(state): State<ApiState>,
    Path(entry_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    close_entry(&state, &entry_id, &request.resolved_by, false).await
}

async fn close_entry(
    state: &ApiState,
    entry_id: &str,
    resolved_by: &str,
    resolve: bool,
) -> (StatusCode, Json<ApiResponse>) {
    if resolved_by.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                error: Some("resolved_by must not be empty".to_string()),
                ..ApiResponse::default()
            }),
        );
    }

    let id = QueueEntryId(entry_id.to_string());
    let result = if resolve {
        state.queue.mark_resolved(&id, resolved_by, Utc::now()).await
    } else {
        state.queue.mark_dismissed(&id, resolved_by, Utc::now()).await
    };

    match result {
        Ok(true) => (StatusCode::OK, Json(ApiResponse { success: true, ..ApiResponse::default() })),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse {
                success: false,
                error: Some("queue entry not found or already closed".to_string()),
                ..ApiResponse::default()
            }),
        ),
        Err(error) => repository_failure(error),
    }
}

/// Manual test send. Counts against the channel's daily budget like any other
/// outreach; a denial surfaces to the operator as 429.
pub async fn send_test_message(
    State(state): State<ApiState>,
    Path(channel_id): Path<String>,
    Json(request): Json<TestMessageRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let phone = normalize_phone(&request.phone);
    if phone.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                error: Some("phone has no digits".to_string()),
                ..ApiResponse::default()
            }),
        );
    }

    let channel_id = ChannelId(channel_id);
    match state.channels.find_by_id(&channel_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse {
                    success: false,
                    error: Some(format!("channel `{}` not found", channel_id.0)),
                    ..ApiResponse::default()
                }),
            )
        }
        Err(error) => return repository_failure(error),
    }

    match state.channels.try_reserve_send(&channel_id, Utc::now()).await {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiResponse {
                    success: false,
                    error: Some("daily send limit reached".to_string()),
                    ..ApiResponse::default()
                }),
            )
        }
        Err(error) => return repository_failure(error),
    }

    let receipt = state.transport.send(&channel_id, &phone, &request.message).await;
    if receipt.success {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                transport_message_id: receipt.transport_message_id,
                ..ApiResponse::default()
            }),
        )
    } else {
        (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse {
                success: false,
                error: receipt.error,
                ..ApiResponse::default()
            }),
        )
    }
}

fn repository_failure(error: RepositoryError) -> (StatusCode, Json<ApiResponse>) {
    error!(event_name = "admin_api_failed", error = %error, "admin API request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse {
            success: false,
            error: Some("internal error".to_string()),
            ..ApiResponse::default()
        }),
    )
}
