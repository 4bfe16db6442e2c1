// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup and validated
//! before any component is constructed; a bad mailbox or wallet setting is
//! a startup error, never a runtime surprise.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MAILBOX_PROVIDER` | `mem`, `redis-single` or `redis-cluster` | Required |
//! | `MAILBOX_REDIS_SINGLE_ADDR` | host:port of the Redis instance | Required for `redis-single` |
//! | `MAILBOX_REDIS_CLUSTER_ADDRS` | comma-separated host:port list | Required for `redis-cluster` |
//! | `AUTH_PROVIDER` | `insecure` or `oauth` | `insecure` |
//! | `OAUTH_JWKS_URL` | JWKS endpoint for ID-token verification | Required for `oauth` |
//! | `OAUTH_ISSUER` | Expected ID-token issuer | Required for `oauth` |
//! | `OAUTH_AUDIENCE` | Expected ID-token audience | Optional |
//! | `ETH_RPC_URL` | Backend JSON-RPC endpoint | Required |
//! | `WALLET_PRIVATE_KEYS` | comma-separated hex private keys | Required |
//! | `HOST` | Server bind address | `127.0.0.1` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `CORS_ALLOWED_ORIGINS` | comma-separated origins | permissive |

use std::env;

/// Selected mailbox provider and its connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxConfig {
    Mem,
    RedisSingle { addr: String },
    RedisCluster { addrs: Vec<String> },
}

impl MailboxConfig {
    /// Provider name as configured, for logs and health reporting.
    pub fn provider(&self) -> &'static str {
        match self {
            MailboxConfig::Mem => "mem",
            MailboxConfig::RedisSingle { .. } => "redis-single",
            MailboxConfig::RedisCluster { .. } => "redis-cluster",
        }
    }
}

/// Selected authentication plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    Insecure,
    OAuth {
        jwks_url: String,
        issuer: String,
        audience: Option<String>,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Fully validated gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mailbox: MailboxConfig,
    pub auth: AuthConfig,
    pub eth_rpc_url: String,
    pub wallet_private_keys: Vec<String>,
    pub log_format: LogFormat,
}

/// Configuration errors reported at startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MAILBOX_PROVIDER must be set. Options are mem, redis-single, redis-cluster.")]
    MissingMailboxProvider,

    #[error("unknown MAILBOX_PROVIDER {0:?}. Options are mem, redis-single, redis-cluster.")]
    UnknownMailboxProvider(String),

    #[error("unknown AUTH_PROVIDER {0:?}. Options are insecure, oauth.")]
    UnknownAuthProvider(String),

    #[error("{0} must be set")]
    MissingValue(&'static str),

    #[error("{name} is invalid: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup. Keeps the
    /// validation logic testable without mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mailbox = mailbox_from_lookup(&lookup)?;
        let auth = auth_from_lookup(&lookup)?;

        let eth_rpc_url = required(&lookup, "ETH_RPC_URL")?;

        let wallet_private_keys: Vec<String> = required(&lookup, "WALLET_PRIVATE_KEYS")?
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if wallet_private_keys.is_empty() {
            return Err(ConfigError::MissingValue("WALLET_PRIVATE_KEYS"));
        }

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "PORT",
                reason: format!("{raw:?} is not a port number"),
            })?,
            None => 8080,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host,
            port,
            mailbox,
            auth,
            eth_rpc_url,
            wallet_private_keys,
            log_format,
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingValue(name)),
    }
}

fn mailbox_from_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<MailboxConfig, ConfigError> {
    let provider = lookup("MAILBOX_PROVIDER").unwrap_or_default();
    if provider.is_empty() {
        return Err(ConfigError::MissingMailboxProvider);
    }

    match provider.as_str() {
        "mem" => Ok(MailboxConfig::Mem),
        "redis-single" => Ok(MailboxConfig::RedisSingle {
            addr: required(lookup, "MAILBOX_REDIS_SINGLE_ADDR")?,
        }),
        "redis-cluster" => {
            let addrs: Vec<String> = required(lookup, "MAILBOX_REDIS_CLUSTER_ADDRS")?
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            if addrs.is_empty() {
                return Err(ConfigError::MissingValue("MAILBOX_REDIS_CLUSTER_ADDRS"));
            }
            Ok(MailboxConfig::RedisCluster { addrs })
        }
        other => Err(ConfigError::UnknownMailboxProvider(other.to_string())),
    }
}

fn auth_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<AuthConfig, ConfigError> {
    match lookup("AUTH_PROVIDER").as_deref().unwrap_or("insecure") {
        "insecure" => Ok(AuthConfig::Insecure),
        "oauth" => Ok(AuthConfig::OAuth {
            jwks_url: required(lookup, "OAUTH_JWKS_URL")?,
            issuer: required(lookup, "OAUTH_ISSUER")?,
            audience: lookup("OAUTH_AUDIENCE").filter(|a| !a.is_empty()),
        }),
        other => Err(ConfigError::UnknownAuthProvider(other.to_string())),
    }
}
