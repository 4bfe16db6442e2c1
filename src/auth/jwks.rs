// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! Keys are fetched over HTTPS and cached with a short TTL so key
//! rotations at the identity provider propagate quickly. When a refresh
//! fails, a stale cache is accepted within a grace period of twice the
//! TTL; beyond that the manager fails closed and every authentication is
//! rejected rather than accepted unverified.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;

use super::error::AuthError;

/// Cache TTL; stale keys are tolerated up to twice this on fetch failure.
const CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedKeys {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Fetches and caches the identity provider's key set.
#[derive(Clone)]
pub struct JwksManager {
    jwks_url: String,
    cache: Arc<RwLock<Option<CachedKeys>>>,
    client: reqwest::Client,
}

impl JwksManager {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache: Arc::new(RwLock::new(None)),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to create HTTP client"),
        }
    }

    /// Resolve the decoding key for a token, by key id when the token
    /// names one, otherwise the first usable key in the set.
    pub async fn decoding_key(
        &self,
        kid: Option<&str>,
    ) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.keys().await?;

        match kid {
            Some(kid) => {
                let jwk = jwks
                    .keys
                    .iter()
                    .find(|k| k.common.key_id.as_deref() == Some(kid))
                    .ok_or(AuthError::NoMatchingKey)?;
                decoding_key_from_jwk(jwk)
            }
            None => jwks
                .keys
                .iter()
                .find_map(|jwk| decoding_key_from_jwk(jwk).ok())
                .ok_or(AuthError::NoMatchingKey),
        }
    }

    async fn keys(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = &*cache {
                if cached.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        match self.fetch().await {
            Ok(jwks) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CachedKeys {
                    jwks: jwks.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(jwks)
            }
            Err(fetch_err) => {
                let cache = self.cache.read().await;
                if let Some(cached) = &*cache {
                    if cached.fetched_at.elapsed() < CACHE_TTL * 2 {
                        tracing::warn!(
                            age_secs = cached.fetched_at.elapsed().as_secs(),
                            error = %fetch_err,
                            "JWKS fetch failed, serving stale cache"
                        );
                        return Ok(cached.jwks.clone());
                    }
                }

                // Fail closed: no usable keys means no authentication.
                tracing::error!(error = %fetch_err, "JWKS fetch failed with no usable cache");
                Err(fetch_err)
            }
        }
    }

    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetch(e.to_string()))
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::Internal(format!("failed to build RSA key: {e}")))?;
            let algorithm = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            Ok((key, algorithm))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::Internal(format!("failed to build EC key: {e}")))?;
            let algorithm = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, algorithm))
        }
        _ => Err(AuthError::Internal(
            "unsupported key type in JWKS".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_is_cheap_to_clone() {
        let manager = JwksManager::new("https://issuer.example/.well-known/jwks.json");
        let clone = manager.clone();
        assert_eq!(manager.jwks_url, clone.jwks_url);
    }
}
