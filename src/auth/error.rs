// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! None of these reach a response body; the middleware answers every
//! authentication failure with a bare `403 Forbidden` and the cause only
//! appears in logs.

/// Authentication failure.
#[derive(Debug)]
pub enum AuthError {
    /// A required authentication header is absent.
    MissingHeader(&'static str),
    /// The token could not be parsed.
    MalformedToken,
    /// The token signature does not verify.
    InvalidSignature,
    /// The token has expired.
    TokenExpired,
    /// The token issuer is not the configured one.
    InvalidIssuer,
    /// The token audience is not the configured one.
    InvalidAudience,
    /// The token is not yet valid.
    TokenNotYetValid,
    /// The identity's email claim is missing or unverified.
    EmailUnverified,
    /// The key set could not be fetched.
    JwksFetch(String),
    /// No key in the set matches the token.
    NoMatchingKey,
    /// The request AAD does not match the session's expected AAD.
    AadMismatch,
    /// Unexpected internal failure.
    Internal(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingHeader(header) => write!(f, "{header} header is required"),
            AuthError::MalformedToken => write!(f, "token is malformed"),
            AuthError::InvalidSignature => write!(f, "token signature is invalid"),
            AuthError::TokenExpired => write!(f, "token has expired"),
            AuthError::InvalidIssuer => write!(f, "token issuer is invalid"),
            AuthError::InvalidAudience => write!(f, "token audience is invalid"),
            AuthError::TokenNotYetValid => write!(f, "token is not yet valid"),
            AuthError::EmailUnverified => write!(f, "email is unverified"),
            AuthError::JwksFetch(msg) => write!(f, "failed to fetch JWKS: {msg}"),
            AuthError::NoMatchingKey => write!(f, "no matching key found in JWKS"),
            AuthError::AadMismatch => write!(f, "AAD does not match"),
            AuthError::Internal(msg) => write!(f, "internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}
