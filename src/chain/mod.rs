// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Client
//!
//! The capability set the wallet owner and backend need from the chain:
//! nonce and gas queries, raw transaction submission, receipts, code and
//! public-key lookups, and filtered log streams. The production
//! implementation in [`eth`] speaks JSON-RPC through alloy; tests inject
//! scripted substitutes.

pub mod eth;

use alloy::consensus::TxEnvelope;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Gas value some chains report instead of an estimation error. Treated
/// as a failed estimation by the wallet owner.
pub const GAS_ESTIMATE_OVERFLOW: u64 = 2_251_799_813_685_248;

/// Message for a gas estimation call.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Address,
    /// `None` estimates a contract creation.
    pub to: Option<Address>,
    pub data: Bytes,
}

/// Outcome of a transaction submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTransactionResponse {
    /// Execution status; 1 is success.
    pub status: u64,
    /// Hex-encoded output of the execution, when the node reports one.
    pub output: String,
    /// Transaction hash.
    pub hash: String,
}

/// The receipt fields the gateway consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub status: u64,
    /// Populated for contract-creation transactions.
    pub contract_address: Option<String>,
}

/// Public key registered for a service address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    /// Expiration timestamp of the key.
    pub timestamp: u64,
    pub public_key: String,
    /// Key-manager signature authenticating the public key.
    pub signature: String,
}

/// Filter for a log subscription.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub address: Option<String>,
    pub topics: Vec<String>,
}

/// One log delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub data: String,
    pub topics: Vec<String>,
}

/// Chain access failures. The first three variants drive the wallet
/// owner's retry policy.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("transaction cost exceeds wallet balance")]
    ExceedsBalance,

    #[error("transaction gas exceeds the block gas limit")]
    ExceedsBlockLimit,

    #[error("transaction nonce is not current")]
    InvalidNonce,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn nonce_at(&self, address: Address) -> Result<u64, ChainError>;

    async fn estimate_gas(&self, call: CallRequest) -> Result<u64, ChainError>;

    async fn send_transaction(&self, tx: TxEnvelope)
        -> Result<SendTransactionResponse, ChainError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Receipt, ChainError>;

    async fn code_at(&self, address: Address) -> Result<String, ChainError>;

    async fn public_key(&self, address: Address) -> Result<PublicKeyResponse, ChainError>;

    /// Open a filtered log stream. The stream closes when `shutdown`
    /// fires or the receiver is dropped.
    async fn subscribe_logs(
        &self,
        filter: LogFilter,
        shutdown: CancellationToken,
    ) -> Result<mpsc::Receiver<LogEntry>, ChainError>;
}
