// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Maps an inbound request to a session key and the
//! additional-authenticated-data (AAD) the caller is expected to present.
//!
//! ## Auth Flow
//!
//! 1. The middleware calls [`Auth::authenticate`] with the request
//!    headers; failure is a bare `403 Forbidden`.
//! 2. On success the derived [`middleware::SessionIdentity`] rides the
//!    request extensions into the handlers.
//! 3. Handlers carrying an AAD call [`Auth::verify`] against the
//!    expected value before dispatching; any mismatch is rejected.
//!
//! Two plugins exist: [`insecure::InsecureAuth`] trusts a plain header
//! (development only) and [`oauth::OpenIdAuth`] verifies an OpenID ID
//! token against the issuer's JWKS.

pub mod error;
pub mod insecure;
pub mod jwks;
pub mod middleware;
pub mod oauth;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

pub use error::AuthError;
pub use insecure::InsecureAuth;
pub use jwks::JwksManager;
pub use middleware::{auth_middleware, Session, SessionIdentity};
pub use oauth::OpenIdAuth;

/// Header carrying the client-chosen session name. All mailbox streams of
/// a client are namespaced under `{identity}:{session name}`.
pub const SESSION_KEY_HEADER: &str = "X-SESSION-KEY";

/// Outcome of authenticating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    /// AAD every payload of this session is expected to carry.
    pub expected_aad: String,
    /// Namespace for the session's mailbox streams.
    pub session_key: String,
}

/// Payload handed to [`Auth::verify`].
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    /// Name of the invoked operation.
    pub api: &'a str,
    /// Target service address, when the operation has one.
    pub address: &'a str,
    /// AAD presented by the request.
    pub aad: &'a [u8],
    /// Request payload.
    pub data: &'a str,
}

/// An authentication plugin.
#[async_trait]
pub trait Auth: Send + Sync {
    fn name(&self) -> &'static str;

    /// Authenticate the request and derive its session identity.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthData, AuthError>;

    /// Verify that a payload carries the authentication data expected for
    /// the session.
    fn verify(&self, request: &AuthRequest<'_>, expected_aad: &str) -> Result<(), AuthError>;
}

/// Session key for an authenticated identity: the identity plus the
/// client-chosen session name, `default` when none is sent.
pub(crate) fn derive_session_key(identity: &str, headers: &HeaderMap) -> String {
    let session = headers
        .get(SESSION_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("default");

    format!("{identity}:{session}")
}

/// Build the authentication plugin selected by configuration.
pub fn from_config(config: &crate::config::AuthConfig) -> Arc<dyn Auth> {
    match config {
        crate::config::AuthConfig::Insecure => Arc::new(InsecureAuth),
        crate::config::AuthConfig::OAuth {
            jwks_url,
            issuer,
            audience,
        } => {
            let mut auth = OpenIdAuth::new(jwks_url.clone(), issuer.clone());
            if let Some(audience) = audience {
                auth = auth.with_audience(audience.clone());
            }
            Arc::new(auth)
        }
    }
}
