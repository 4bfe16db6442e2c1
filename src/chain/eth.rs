// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC chain client backed by alloy.
//!
//! Submission errors are classified from the node's error message into the
//! three cases the wallet owner's retry policy distinguishes; everything
//! else stays an opaque RPC error. Log subscriptions are served by a
//! block-range polling task since the gateway speaks plain HTTP to the
//! node.

use std::borrow::Cow;
use std::str::FromStr;
use std::time::Duration;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::Ethereum;
use alloy::primitives::{Address, B256};
use alloy::providers::{
    fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
    Identity, Provider, ProviderBuilder, RootProvider,
};
use alloy::rpc::types::{Filter, TransactionRequest};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    CallRequest, ChainClient, ChainError, LogEntry, LogFilter, PublicKeyResponse, Receipt,
    SendTransactionResponse,
};

/// HTTP provider type (with the default fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// How often the log poller checks for new blocks.
const LOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Buffered logs per subscription before backpressure.
const LOG_CHANNEL_CAPACITY: usize = 64;

pub struct EthChainClient {
    provider: HttpProvider,
}

impl EthChainClient {
    /// Connect to the node at `rpc_url`.
    pub fn connect(rpc_url: &str) -> Result<Self, ChainError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::Rpc(format!("invalid RPC URL: {e}")))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self { provider })
    }
}

/// Map a submission failure onto the retry policy's error classes.
fn classify_send_error(message: String) -> ChainError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") || lower.contains("exceeds balance") {
        ChainError::ExceedsBalance
    } else if lower.contains("exceeds block gas limit") {
        ChainError::ExceedsBlockLimit
    } else if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("invalid nonce")
        || lower.contains("replacement transaction underpriced")
    {
        ChainError::InvalidNonce
    } else {
        ChainError::Rpc(message)
    }
}

fn parse_topics(topics: &[String]) -> Result<Vec<B256>, ChainError> {
    topics
        .iter()
        .map(|t| B256::from_str(t).map_err(|e| ChainError::InvalidAddress(format!("{t}: {e}"))))
        .collect()
}

#[async_trait]
impl ChainClient for EthChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn nonce_at(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn estimate_gas(&self, call: CallRequest) -> Result<u64, ChainError> {
        let mut tx = TransactionRequest::default()
            .from(call.from)
            .input(call.data.into());
        if let Some(to) = call.to {
            tx = tx.to(to);
        }

        self.provider
            .estimate_gas(tx)
            .await
            .map_err(|e| ChainError::Rpc(format!("gas estimation failed: {e}")))
    }

    async fn send_transaction(
        &self,
        tx: TxEnvelope,
    ) -> Result<SendTransactionResponse, ChainError> {
        let raw = tx.encoded_2718();

        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| classify_send_error(e.to_string()))?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to confirm transaction: {e}")))?;

        Ok(SendTransactionResponse {
            status: if receipt.status() { 1 } else { 0 },
            // Plain JSON-RPC receipts carry no return data; nodes that do
            // report execution output surface it through the receipt RPC
            // error instead.
            output: String::new(),
            hash: format!("{:#x}", receipt.transaction_hash),
        })
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Receipt, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::NotFound(format!("receipt {hash:#x}")))?;

        Ok(Receipt {
            status: if receipt.status() { 1 } else { 0 },
            contract_address: receipt.contract_address.map(|a| a.to_string()),
        })
    }

    async fn code_at(&self, address: Address) -> Result<String, ChainError> {
        let code = self
            .provider
            .get_code_at(address)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(format!("0x{}", alloy::hex::encode(code)))
    }

    async fn public_key(&self, address: Address) -> Result<PublicKeyResponse, ChainError> {
        self.provider
            .raw_request(Cow::Borrowed("eth_getPublicKey"), (address,))
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn subscribe_logs(
        &self,
        filter: LogFilter,
        shutdown: CancellationToken,
    ) -> Result<mpsc::Receiver<LogEntry>, ChainError> {
        let address = match &filter.address {
            Some(raw) if !raw.is_empty() => Some(
                Address::from_str(raw)
                    .map_err(|e| ChainError::InvalidAddress(format!("{raw}: {e}")))?,
            ),
            _ => None,
        };
        let topics = parse_topics(&filter.topics)?;

        // Subscriptions only see logs produced after they are created.
        let start = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let (sender, receiver) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let provider = self.provider.clone();
        tokio::spawn(async move {
            poll_logs(provider, address, topics, start + 1, sender, shutdown).await;
        });

        Ok(receiver)
    }
}

/// Poll `eth_getLogs` from `from` to the advancing head, forwarding each
/// log to the subscription channel. Exits when the subscription is
/// cancelled or its receiver is dropped.
async fn poll_logs<P: Provider + Clone>(
    provider: P,
    address: Option<Address>,
    topics: Vec<B256>,
    mut from: u64,
    sender: mpsc::Sender<LogEntry>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match provider.get_block_number().await {
            Ok(head) if head >= from => {
                let mut filter = Filter::new().from_block(from).to_block(head);
                if let Some(address) = address {
                    filter = filter.address(address);
                }
                if !topics.is_empty() {
                    filter = filter.event_signature(topics.clone());
                }

                match provider.get_logs(&filter).await {
                    Ok(logs) => {
                        for log in &logs {
                            let entry = LogEntry {
                                data: format!("0x{}", alloy::hex::encode(&log.data().data)),
                                topics: log.topics().iter().map(|t| format!("{t:#x}")).collect(),
                            };
                            if sender.send(entry).await.is_err() {
                                // Subscriber is gone.
                                return;
                            }
                        }
                        from = head + 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "log poll failed, will retry");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "block number poll failed, will retry");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}
