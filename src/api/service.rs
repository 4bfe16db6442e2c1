// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service endpoints: asynchronous deploy/execute submission, service
//! stream polling, and synchronous code/public-key lookups.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{AuthRequest, Session, SessionIdentity};
use crate::backend::{BackendError, GetCodeRequest, GetPublicKeyRequest};
use crate::chain::ChainError;
use crate::error::ApiError;
use crate::events::{PollError, PolledEvents};
use crate::state::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to deploy a service.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DeployServiceBody {
    /// Hex-encoded deployment payload.
    pub data: String,
    /// Issuer identity tag bound to the payload.
    #[serde(default)]
    pub aad: Option<String>,
}

/// Request to execute a deployed service.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExecuteServiceBody {
    /// Address of the service to execute.
    pub address: String,
    /// Hex-encoded call payload.
    pub data: String,
    /// Issuer identity tag bound to the payload.
    #[serde(default)]
    pub aad: Option<String>,
}

/// Immediate response to an asynchronous request: the event id under
/// which the result will appear in the session's service stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AsyncResponse {
    pub id: u64,
}

/// Request to poll the session's service stream.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PollServiceBody {
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

/// Request for the code stored at a service address.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GetCodeBody {
    pub address: String,
}

/// Code stored at a service address.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GetCodeResponseBody {
    pub address: String,
    /// Hex-encoded code.
    pub code: String,
}

/// Request for the public key of a service address.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GetPublicKeyBody {
    pub address: String,
}

/// Public key registered for a service address.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GetPublicKeyResponseBody {
    /// Expiration timestamp of the key.
    pub timestamp: u64,
    pub address: String,
    pub public_key: String,
    /// Key-manager signature authenticating the public key.
    pub signature: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Verify the payload's AAD against the session's expected AAD.
fn verify_aad(
    state: &AppState,
    identity: &SessionIdentity,
    api: &'static str,
    address: &str,
    aad: &Option<String>,
    data: &str,
) -> Result<(), ApiError> {
    let request = AuthRequest {
        api,
        address,
        aad: aad.as_deref().unwrap_or("").as_bytes(),
        data,
    };
    state
        .auth
        .verify(&request, &identity.expected_aad)
        .map_err(|e| ApiError::forbidden(e.to_string()))
}

fn backend_error(err: BackendError) -> ApiError {
    match err {
        BackendError::InvalidPayload(message) => ApiError::bad_request(message),
        BackendError::Chain(ChainError::NotFound(message)) => ApiError::not_found(message),
        other => ApiError::service_unavailable(other.to_string()),
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

/// Submit a service deployment.
#[utoipa::path(
    post,
    path = "/v1/service/deploy",
    tag = "Service",
    request_body = DeployServiceBody,
    responses(
        (status = 200, description = "Deployment accepted", body = AsyncResponse),
        (status = 403, description = "Authentication or AAD verification failed")
    )
)]
pub async fn deploy_service(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(request): Json<DeployServiceBody>,
) -> Result<Json<AsyncResponse>, ApiError> {
    verify_aad(
        &state,
        &identity,
        "DeployService",
        "",
        &request.aad,
        &request.data,
    )?;

    let id = state
        .dispatcher
        .deploy_service(&identity.session_key, request.data)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(AsyncResponse { id }))
}

/// Submit a service execution.
#[utoipa::path(
    post,
    path = "/v1/service/execute",
    tag = "Service",
    request_body = ExecuteServiceBody,
    responses(
        (status = 200, description = "Execution accepted", body = AsyncResponse),
        (status = 400, description = "Missing service address"),
        (status = 403, description = "Authentication or AAD verification failed")
    )
)]
pub async fn execute_service(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(request): Json<ExecuteServiceBody>,
) -> Result<Json<AsyncResponse>, ApiError> {
    if request.address.is_empty() {
        return Err(ApiError::bad_request(
            "address is required to execute a service",
        ));
    }
    verify_aad(
        &state,
        &identity,
        "ExecuteService",
        &request.address,
        &request.aad,
        &request.data,
    )?;

    let id = state
        .dispatcher
        .execute_service(&identity.session_key, request.address, request.data)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(AsyncResponse { id }))
}

/// Poll the session's service stream for deploy/execute results.
#[utoipa::path(
    post,
    path = "/v1/service/poll",
    tag = "Service",
    request_body = PollServiceBody,
    responses(
        (status = 200, description = "Window of events", body = PolledEvents)
    )
)]
pub async fn poll_service(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(request): Json<PollServiceBody>,
) -> Result<Json<PolledEvents>, ApiError> {
    let polled = state
        .dispatcher
        .poll_service(
            &identity.session_key,
            request.offset,
            request.count,
            request.discard_previous,
        )
        .await
        .map_err(poll_error)?;

    Ok(Json(polled))
}

/// Fetch the code stored at a service address.
#[utoipa::path(
    post,
    path = "/v1/service/code",
    tag = "Service",
    request_body = GetCodeBody,
    responses(
        (status = 200, description = "Code at the address", body = GetCodeResponseBody),
        (status = 404, description = "Unknown address")
    )
)]
pub async fn get_code(
    State(state): State<AppState>,
    Session(_identity): Session,
    Json(request): Json<GetCodeBody>,
) -> Result<Json<GetCodeResponseBody>, ApiError> {
    let response = state
        .dispatcher
        .get_code(GetCodeRequest {
            address: request.address,
        })
        .await
        .map_err(backend_error)?;

    Ok(Json(GetCodeResponseBody {
        address: response.address,
        code: response.code,
    }))
}

/// Fetch the public key registered for a service address.
#[utoipa::path(
    post,
    path = "/v1/service/public-key",
    tag = "Service",
    request_body = GetPublicKeyBody,
    responses(
        (status = 200, description = "Public key of the address", body = GetPublicKeyResponseBody)
    )
)]
pub async fn get_public_key(
    State(state): State<AppState>,
    Session(_identity): Session,
    Json(request): Json<GetPublicKeyBody>,
) -> Result<Json<GetPublicKeyResponseBody>, ApiError> {
    let response = state
        .dispatcher
        .get_public_key(GetPublicKeyRequest {
            address: request.address,
        })
        .await
        .map_err(backend_error)?;

    Ok(Json(GetPublicKeyResponseBody {
        timestamp: response.timestamp,
        address: response.address,
        public_key: response.public_key,
        signature: response.signature,
    }))
}
