// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Header-based development authenticator.
//!
//! Trusts whatever identity the `X-INSECURE-AUTH` header carries and
//! performs no payload verification. Never enable outside development.

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::{derive_session_key, Auth, AuthData, AuthError, AuthRequest};

pub const INSECURE_AUTH_HEADER: &str = "X-INSECURE-AUTH";

pub struct InsecureAuth;

#[async_trait]
impl Auth for InsecureAuth {
    fn name(&self) -> &'static str {
        "auth.insecure"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthData, AuthError> {
        let identity = headers
            .get(INSECURE_AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingHeader(INSECURE_AUTH_HEADER))?;

        Ok(AuthData {
            expected_aad: String::new(),
            session_key: derive_session_key(identity, headers),
        })
    }

    fn verify(&self, _request: &AuthRequest<'_>, _expected_aad: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn identity_comes_from_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(INSECURE_AUTH_HEADER, HeaderValue::from_static("alice"));

        let data = InsecureAuth.authenticate(&headers).await.unwrap();
        assert_eq!(data.session_key, "alice:default");
        assert!(data.expected_aad.is_empty());
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let err = InsecureAuth.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingHeader(INSECURE_AUTH_HEADER)));
    }
}
