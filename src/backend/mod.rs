// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Backend Client
//!
//! The operations the dispatcher runs against the execution backend:
//! service deployment and execution, code and public-key lookups, and
//! filtered log streams. [`eth::EthBackend`] implements them over the
//! wallet pool and chain client; tests inject scripted substitutes.

pub mod eth;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainError, LogEntry, LogFilter};
use crate::events::ErrorInfo;
use crate::wallet::WalletError;

/// Deploy a new service from its payload.
#[derive(Debug, Clone)]
pub struct DeployServiceRequest {
    /// Event identifier reserved for the request.
    pub id: u64,
    /// Hex-encoded deployment payload.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployServiceResponse {
    /// Address at which the deployed service is reachable.
    pub address: String,
}

/// Execute an existing service.
#[derive(Debug, Clone)]
pub struct ExecuteServiceRequest {
    /// Event identifier reserved for the request.
    pub id: u64,
    pub address: String,
    /// Hex-encoded call payload.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteServiceResponse {
    pub address: String,
    /// Output produced by the execution.
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct GetCodeRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCodeResponse {
    pub address: String,
    /// Hex-encoded code stored at the address.
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct GetPublicKeyRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPublicKeyResponse {
    /// Expiration timestamp of the key.
    pub timestamp: u64,
    pub address: String,
    pub public_key: String,
    /// Key-manager signature authenticating the public key.
    pub signature: String,
}

/// Backend failures. Converted into error events by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl BackendError {
    /// The cause a client sees in a polled error event.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            BackendError::Wallet(WalletError::Execution { code, message }) => ErrorInfo {
                error_code: *code,
                description: message.clone(),
            },
            other => ErrorInfo::internal(other.to_string()),
        }
    }
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn deploy_service(
        &self,
        request: DeployServiceRequest,
    ) -> Result<DeployServiceResponse, BackendError>;

    async fn execute_service(
        &self,
        request: ExecuteServiceRequest,
    ) -> Result<ExecuteServiceResponse, BackendError>;

    async fn get_code(&self, request: GetCodeRequest) -> Result<GetCodeResponse, BackendError>;

    async fn get_public_key(
        &self,
        request: GetPublicKeyRequest,
    ) -> Result<GetPublicKeyResponse, BackendError>;

    /// Open a log stream filtered by address and topics. The stream
    /// closes when `shutdown` fires or the receiver is dropped.
    async fn subscribe_logs(
        &self,
        filter: LogFilter,
        shutdown: CancellationToken,
    ) -> Result<mpsc::Receiver<LogEntry>, BackendError>;
}
