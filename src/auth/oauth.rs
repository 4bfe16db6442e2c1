// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenID ID-token authenticator.
//!
//! The client presents an ID token in the `X-ID-TOKEN` header. The token
//! signature is verified against the issuer's JWKS, the issuer (and
//! audience when configured) is validated, and the verified email claim
//! becomes both the identity and the AAD every payload of the session is
//! expected to carry.

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;

use super::jwks::JwksManager;
use super::{derive_session_key, Auth, AuthData, AuthError, AuthRequest};

pub const ID_TOKEN_HEADER: &str = "X-ID-TOKEN";

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

#[derive(Debug, Deserialize)]
struct OpenIdClaims {
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
}

pub struct OpenIdAuth {
    jwks: JwksManager,
    issuer: String,
    audience: Option<String>,
}

impl OpenIdAuth {
    pub fn new(jwks_url: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            jwks: JwksManager::new(jwks_url),
            issuer: issuer.into(),
            audience: None,
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    async fn verify_token(&self, token: &str) -> Result<OpenIdClaims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        let (decoding_key, algorithm) = self.jwks.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let token_data =
            decode::<OpenIdClaims>(token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                        AuthError::TokenNotYetValid
                    }
                    _ => AuthError::MalformedToken,
                }
            })?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl Auth for OpenIdAuth {
    fn name(&self) -> &'static str {
        "auth.oauth"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthData, AuthError> {
        let token = headers
            .get(ID_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingHeader(ID_TOKEN_HEADER))?;

        let claims = self.verify_token(token).await?;
        if !claims.email_verified || claims.email.is_empty() {
            return Err(AuthError::EmailUnverified);
        }

        Ok(AuthData {
            expected_aad: claims.email.clone(),
            session_key: derive_session_key(&claims.email, headers),
        })
    }

    /// Compare the request AAD bytewise with the session's expected AAD.
    fn verify(&self, request: &AuthRequest<'_>, expected_aad: &str) -> Result<(), AuthError> {
        if request.aad != expected_aad.as_bytes() {
            return Err(AuthError::AadMismatch);
        }
        Ok(())
    }
}
