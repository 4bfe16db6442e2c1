// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Event endpoints: subscription lifecycle and subscription polling.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::service::AsyncResponse;
use crate::error::ApiError;
use crate::events::{PollError, PolledEvents};
use crate::state::AppState;
use crate::subscriptions::SubscriptionError;

use crate::auth::Session;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to create a subscription.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubscribeBody {
    /// Upstream event kind; only `logs` is served.
    pub event: String,
    /// Restrict delivered logs to this address.
    #[serde(default)]
    pub address: String,
    /// Restrict delivered logs to these topics.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Request to poll a subscription's stream.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PollEventBody {
    /// Subscription number returned by subscribe.
    pub id: u64,
    /// First event offset the client wants.
    #[serde(default)]
    pub offset: u64,
    /// Maximum number of events to return.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Drop all events below `offset` before reading.
    #[serde(default)]
    pub discard_previous: bool,
}

fn default_count() -> u32 {
    10
}

/// Request to destroy a subscription.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UnsubscribeBody {
    /// Subscription number returned by subscribe.
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnsubscribeResponse {}

// =============================================================================
// Handlers
// =============================================================================

fn subscription_error(err: SubscriptionError) -> ApiError {
    match err {
        SubscriptionError::UnsupportedEvent(_) => ApiError::bad_request(err.to_string()),
        SubscriptionError::NotFound => ApiError::not_found(err.to_string()),
        SubscriptionError::Backend(cause) => ApiError::service_unavailable(cause.to_string()),
        other => ApiError::internal(other.to_string()),
    }
}

fn poll_error(err: PollError) -> ApiError {
    match err {
        PollError::Mailbox(e) => ApiError::internal(e.to_string()),
        PollError::Codec(e) => {
            tracing::error!(error = %e, "stored event failed to decode");
            ApiError::internal(e.to_string())
        }
    }
}

/// Create a subscription on backend events.
#[utoipa::path(
    post,
    path = "/v1/event/subscribe",
    tag = "Event",
    request_body = SubscribeBody,
    responses(
        (status = 200, description = "Subscription created", body = AsyncResponse),
        (status = 400, description = "Unsupported event kind")
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(request): Json<SubscribeBody>,
) -> Result<Json<AsyncResponse>, ApiError> {
    let id = state
        .subscriptions
        .subscribe(
            &identity.session_key,
            &request.event,
            request.address,
            request.topics,
        )
        .await
        .map_err(subscription_error)?;

    Ok(Json(AsyncResponse { id }))
}

/// Poll a subscription's stream for delivered events.
#[utoipa::path(
    post,
    path = "/v1/event/poll",
    tag = "Event",
    request_body = PollEventBody,
    responses(
        (status = 200, description = "Window of events", body = PolledEvents)
    )
)]
pub async fn poll_event(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(request): Json<PollEventBody>,
) -> Result<Json<PolledEvents>, ApiError> {
    let polled = state
        .subscriptions
        .poll_event(
            &identity.session_key,
            request.id,
            request.offset,
            request.count,
            request.discard_previous,
        )
        .await
        .map_err(poll_error)?;

    Ok(Json(polled))
}

/// Destroy a subscription and its stream.
#[utoipa::path(
    post,
    path = "/v1/event/unsubscribe",
    tag = "Event",
    request_body = UnsubscribeBody,
    responses(
        (status = 200, description = "Subscription destroyed", body = UnsubscribeResponse),
        (status = 404, description = "Unknown subscription")
    )
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(request): Json<UnsubscribeBody>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    state
        .subscriptions
        .unsubscribe(&identity.session_key, request.id)
        .await
        .map_err(subscription_error)?;

    Ok(Json(UnsubscribeResponse {}))
}
