// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware.
//!
//! Applied to every `/v1` route: authenticates the request through the
//! configured plugin, answers failures with a bare `403 Forbidden`, and
//! attaches the derived [`SessionIdentity`] to the request extensions for
//! handlers to extract.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated identity of the request's session.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Namespace for the session's mailbox streams.
    pub session_key: String,
    /// AAD every payload of this session is expected to carry.
    pub expected_aad: String,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.auth.authenticate(request.headers()).await {
        Ok(data) => {
            request.extensions_mut().insert(SessionIdentity {
                session_key: data.session_key,
                expected_aad: data.expected_aad,
            });
            next.run(request).await
        }
        Err(err) => {
            tracing::debug!(error = %err, "authentication failed");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Extractor for the identity attached by [`auth_middleware`].
pub struct Session(pub SessionIdentity);

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionIdentity>()
            .cloned()
            .map(Session)
            .ok_or_else(|| ApiError::forbidden("request is not authenticated"))
    }
}
