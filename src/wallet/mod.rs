// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Owner
//!
//! A wallet is owned by exactly one worker task. All nonce reads, nonce
//! writes, signing and chain submissions for that wallet happen on the
//! worker's thread, so nonce monotonicity is a structural property rather
//! than a locking discipline. Callers submit work over a channel and await
//! a oneshot reply.
//!
//! ## Submission pipeline
//!
//! 1. Estimate gas; the chain's overflow sentinel is treated as a failed
//!    estimation and nothing is submitted.
//! 2. Allocate the next nonce, build a legacy transaction at the fixed
//!    gas price, and sign it.
//! 3. Submit through the retry engine. A stale-nonce rejection refreshes
//!    the nonce from the chain and retries; balance and block-limit
//!    rejections are terminal. Generation and signing happen inside the
//!    retry supplier so a refreshed nonce is picked up by the next
//!    attempt.
//! 4. A receipt status other than 1 is reported as an execution failure
//!    carrying the best-effort decoded output.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::chain::{
    CallRequest, ChainClient, ChainError, SendTransactionResponse, GAS_ESTIMATE_OVERFLOW,
};
use crate::events::codes;
use crate::retry::{retry_with_config, RetryConfig, RetryError, Supplier};

/// Receipt status of a successful transaction.
pub const STATUS_OK: u64 = 1;

/// Fixed gas price for all gateway transactions.
const GAS_PRICE: u128 = 1_000_000_000;

/// Queued requests per owner before submitters are backpressured.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Request to run a transaction through a wallet.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Event identifier reserved for the request, carried for logging.
    pub id: u64,
    /// Target service address; empty deploys a new service.
    pub address: String,
    /// Transaction payload.
    pub data: Vec<u8>,
}

/// Outcome of an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteResponse {
    /// The target address, or the created contract address for deploys.
    pub address: String,
    /// Hex-encoded execution output, when the chain reports one.
    pub output: String,
    pub hash: String,
}

/// Wallet pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("failed to estimate gas: {0}")]
    EstimateGas(String),

    #[error("failed to sign transaction: {0}")]
    Sign(String),

    #[error("failed to send transaction: {0}")]
    SendTransaction(ChainError),

    #[error("failed to fetch nonce: {0}")]
    FetchNonce(ChainError),

    #[error("failed to query chain: {0}")]
    Chain(ChainError),

    #[error("failed to fetch transaction receipt: {0}")]
    Receipt(String),

    /// The transaction ran and the receipt reported failure.
    #[error("{message}")]
    Execution { code: i64, message: String },

    #[error("wallet worker unavailable")]
    Unavailable,

    #[error("operation cancelled")]
    Cancelled,
}

/// Notifications emitted by wallet owners.
#[async_trait]
pub trait WalletCallbacks: Send + Sync {
    /// The owned wallet cannot cover a transaction.
    async fn wallet_out_of_funds(&self, address: &str);
}

/// Default callback sink that only logs.
pub struct LoggingCallbacks;

#[async_trait]
impl WalletCallbacks for LoggingCallbacks {
    async fn wallet_out_of_funds(&self, address: &str) {
        tracing::warn!(address, "wallet out of funds");
    }
}

/// Key material and signing for one wallet.
pub struct Wallet {
    signer: PrivateKeySigner,
    address: Address,
    chain_id: u64,
}

impl Wallet {
    /// Build a wallet from a hex private key (with or without 0x prefix).
    pub fn from_hex_key(private_key: &str, chain_id: u64) -> Result<Self, WalletError> {
        let key_bytes = alloy::hex::decode(private_key)
            .map_err(|e| WalletError::InvalidPrivateKey(e.to_string()))?;
        let signer = PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| WalletError::InvalidPrivateKey(e.to_string()))?;
        let address = signer.address();

        Ok(Self {
            signer,
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn sign_transaction(&self, mut tx: TxLegacy) -> Result<TxEnvelope, WalletError> {
        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| WalletError::Sign(e.to_string()))?;

        Ok(TxEnvelope::Legacy(tx.into_signed(signature)))
    }
}

enum OwnerRequest {
    Execute {
        request: ExecuteRequest,
        reply: oneshot::Sender<Result<ExecuteResponse, WalletError>>,
    },
    Sign {
        tx: TxLegacy,
        reply: oneshot::Sender<Result<TxEnvelope, WalletError>>,
    },
}

/// Handle to a wallet's single-writer worker.
pub struct WalletOwner {
    requests: mpsc::Sender<OwnerRequest>,
}

impl WalletOwner {
    /// Spawn the worker task owning `wallet`, starting from `nonce`.
    /// The worker runs until process shutdown; it is never cancelled by
    /// an individual caller.
    pub fn spawn(
        wallet: Wallet,
        nonce: u64,
        client: Arc<dyn ChainClient>,
        callbacks: Arc<dyn WalletCallbacks>,
        shutdown: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let task = OwnerTask {
            wallet,
            nonce,
            client,
            callbacks,
            retry: RetryConfig::default(),
            shutdown,
        };
        tokio::spawn(task.run(receiver));

        Self { requests: sender }
    }

    /// Estimate, sign and submit a transaction, serialised with every
    /// other operation of this wallet.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, WalletError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(OwnerRequest::Execute { request, reply })
            .await
            .map_err(|_| WalletError::Unavailable)?;
        response.await.map_err(|_| WalletError::Unavailable)?
    }

    /// Sign a prepared transaction without submitting it.
    pub async fn sign(&self, tx: TxLegacy) -> Result<TxEnvelope, WalletError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(OwnerRequest::Sign { tx, reply })
            .await
            .map_err(|_| WalletError::Unavailable)?;
        response.await.map_err(|_| WalletError::Unavailable)?
    }
}

/// Worker state; lives on the worker task only.
struct OwnerTask {
    wallet: Wallet,
    nonce: u64,
    client: Arc<dyn ChainClient>,
    callbacks: Arc<dyn WalletCallbacks>,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl OwnerTask {
    async fn run(mut self, mut requests: mpsc::Receiver<OwnerRequest>) {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(OwnerRequest::Execute { request, reply }) => {
                        let result = self.execute_transaction(request).await;
                        let _ = reply.send(result);
                    }
                    Some(OwnerRequest::Sign { tx, reply }) => {
                        let _ = reply.send(self.wallet.sign_transaction(tx));
                    }
                    None => return,
                },
                _ = shutdown.cancelled() => {
                    tracing::info!(address = %self.wallet.address(), "wallet owner shutting down");
                    return;
                }
            }
        }
    }

    /// Current nonce, advancing it for the next transaction.
    fn transaction_nonce(&mut self) -> u64 {
        let nonce = self.nonce;
        self.nonce += 1;
        nonce
    }

    /// Replace the local nonce with the chain's view of the wallet.
    async fn update_nonce(&mut self) -> Result<(), WalletError> {
        let nonce = self
            .client
            .nonce_at(self.wallet.address())
            .await
            .map_err(WalletError::FetchNonce)?;

        tracing::debug!(address = %self.wallet.address(), nonce, "nonce refreshed from chain");
        self.nonce = nonce;
        Ok(())
    }

    async fn estimate_gas(
        &self,
        request: &ExecuteRequest,
        to: Option<Address>,
    ) -> Result<u64, WalletError> {
        let gas = self
            .client
            .estimate_gas(CallRequest {
                from: self.wallet.address(),
                to,
                data: Bytes::from(request.data.clone()),
            })
            .await
            .map_err(|e| WalletError::EstimateGas(e.to_string()))?;

        if gas == GAS_ESTIMATE_OVERFLOW {
            tracing::debug!(
                id = request.id,
                address = %request.address,
                "gas estimation returned the overflow sentinel"
            );
            return Err(WalletError::EstimateGas(
                "gas estimation could not be completed because of execution failure".to_string(),
            ));
        }

        tracing::debug!(id = request.id, address = %request.address, gas, "gas estimated");
        Ok(gas)
    }

    fn generate_and_sign(
        &mut self,
        to: Option<Address>,
        gas: u64,
        data: &[u8],
    ) -> Result<TxEnvelope, WalletError> {
        let tx = TxLegacy {
            chain_id: Some(self.wallet.chain_id),
            nonce: self.transaction_nonce(),
            gas_price: GAS_PRICE,
            gas_limit: gas,
            to: match to {
                Some(address) => TxKind::Call(address),
                None => TxKind::Create,
            },
            value: U256::ZERO,
            input: Bytes::from(data.to_vec()),
        };

        self.wallet.sign_transaction(tx)
    }

    async fn send_transaction(
        &mut self,
        request: &ExecuteRequest,
        to: Option<Address>,
        gas: u64,
    ) -> Result<SendTransactionResponse, WalletError> {
        let shutdown = self.shutdown.clone();
        let config = self.retry.clone();
        let mut attempt = SendAttempt {
            owner: self,
            to,
            gas,
            data: request.data.clone(),
            notify_address: request.address.clone(),
        };

        match retry_with_config(&shutdown, &config, &mut attempt).await {
            Ok(response) => Ok(response),
            Err(failure) => Err(failure.into_cause().unwrap_or(WalletError::Cancelled)),
        }
    }

    async fn execute_transaction(
        &mut self,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse, WalletError> {
        let to = if request.address.is_empty() {
            None
        } else {
            Some(
                Address::from_str(&request.address)
                    .map_err(|e| WalletError::InvalidAddress(format!("{}: {e}", request.address)))?,
            )
        };

        let gas = match self.estimate_gas(&request, to).await {
            Ok(gas) => gas,
            Err(err) => {
                tracing::debug!(
                    id = request.id,
                    address = %request.address,
                    error = %err,
                    "failed to estimate gas"
                );
                return Err(err);
            }
        };

        let response = self.send_transaction(&request, to, gas).await?;

        if response.status != STATUS_OK {
            // Best effort: the output is usually a hex-encoded message.
            let output = match alloy::hex::decode(&response.output) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    tracing::debug!(
                        id = request.id,
                        error = %err,
                        "failed to decode transaction output as hex"
                    );
                    String::new()
                }
            };

            let message = format!(
                "transaction receipt has status {} which indicates a transaction \
                 execution failure with error {}",
                response.status, output
            );
            tracing::debug!(id = request.id, address = %request.address, "transaction execution failed");

            return Err(WalletError::Execution {
                code: codes::EXECUTION_FAILED,
                message,
            });
        }

        let mut address = request.address.clone();
        if address.is_empty() {
            let hash = B256::from_str(&response.hash)
                .map_err(|e| WalletError::Receipt(format!("malformed hash: {e}")))?;
            let receipt = self
                .client
                .transaction_receipt(hash)
                .await
                .map_err(|e| WalletError::Receipt(e.to_string()))?;

            address = receipt
                .contract_address
                .ok_or_else(|| WalletError::Receipt("receipt has no contract address".to_string()))?;
        }

        Ok(ExecuteResponse {
            address,
            output: response.output,
            hash: response.hash,
        })
    }
}

/// One submission attempt; regenerates and re-signs with the current
/// nonce every time it runs.
struct SendAttempt<'a> {
    owner: &'a mut OwnerTask,
    to: Option<Address>,
    gas: u64,
    data: Vec<u8>,
    notify_address: String,
}

#[async_trait]
impl Supplier for SendAttempt<'_> {
    type Output = SendTransactionResponse;
    type Error = WalletError;

    async fn attempt(&mut self) -> Result<SendTransactionResponse, RetryError<WalletError>> {
        let tx = self
            .owner
            .generate_and_sign(self.to, self.gas, &self.data)
            .map_err(RetryError::NonRecoverable)?;

        match self.owner.client.send_transaction(tx).await {
            Ok(response) => Ok(response),
            Err(ChainError::ExceedsBalance) => {
                self.owner
                    .callbacks
                    .wallet_out_of_funds(&self.notify_address)
                    .await;
                Err(RetryError::NonRecoverable(WalletError::SendTransaction(
                    ChainError::ExceedsBalance,
                )))
            }
            Err(ChainError::ExceedsBlockLimit) => Err(RetryError::NonRecoverable(
                WalletError::SendTransaction(ChainError::ExceedsBlockLimit),
            )),
            Err(ChainError::InvalidNonce) => match self.owner.update_nonce().await {
                // Refreshed; the next attempt allocates from the chain's
                // current nonce.
                Ok(()) => Err(RetryError::Recoverable(WalletError::SendTransaction(
                    ChainError::InvalidNonce,
                ))),
                Err(err) => Err(RetryError::NonRecoverable(err)),
            },
            Err(other) => Err(RetryError::NonRecoverable(WalletError::SendTransaction(
                other,
            ))),
        }
    }
}

/// Round-robin pool of wallet owners, one per configured key. Bounds the
/// number of concurrently submitting wallets for the whole gateway.
pub struct WalletPool {
    owners: Vec<WalletOwner>,
    next: AtomicUsize,
}

impl WalletPool {
    /// Initialise every wallet from the chain (chain id and starting
    /// nonce) and spawn its owner.
    pub async fn start(
        private_keys: &[String],
        client: Arc<dyn ChainClient>,
        callbacks: Arc<dyn WalletCallbacks>,
        shutdown: &CancellationToken,
    ) -> Result<Self, WalletError> {
        let chain_id = client.chain_id().await.map_err(WalletError::Chain)?;

        let mut owners = Vec::with_capacity(private_keys.len());
        for key in private_keys {
            let wallet = Wallet::from_hex_key(key, chain_id)?;
            let nonce = client
                .nonce_at(wallet.address())
                .await
                .map_err(WalletError::FetchNonce)?;

            tracing::info!(address = %wallet.address(), nonce, "wallet owner starting");
            owners.push(WalletOwner::spawn(
                wallet,
                nonce,
                Arc::clone(&client),
                Arc::clone(&callbacks),
                shutdown.clone(),
            ));
        }

        Ok(Self {
            owners,
            next: AtomicUsize::new(0),
        })
    }

    /// Execute on the next wallet in round-robin order.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, WalletError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.owners.len();
        self.owners[index].execute(request).await
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::chain::Receipt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    // Well-known test key.
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            base_timeout: Duration::from_millis(5),
            max_timeout: Duration::from_millis(10),
            ..RetryConfig::default()
        }
    }

    fn owner_task(chain: Arc<MockChain>, nonce: u64) -> OwnerTask {
        OwnerTask {
            wallet: Wallet::from_hex_key(TEST_KEY, 1).unwrap(),
            nonce,
            client: chain,
            callbacks: Arc::new(LoggingCallbacks),
            retry: fast_retry(),
            shutdown: CancellationToken::new(),
        }
    }

    fn execute_request(address: &str) -> ExecuteRequest {
        ExecuteRequest {
            id: 0,
            address: address.to_string(),
            data: vec![0x01, 0x02],
        }
    }

    const TARGET: &str = "0x00000000000000000000000000000000000000bb";

    #[tokio::test]
    async fn nonces_increase_across_executions() {
        let chain = Arc::new(MockChain::default());
        let mut task = owner_task(Arc::clone(&chain), 3);

        for _ in 0..3 {
            task.execute_transaction(execute_request(TARGET)).await.unwrap();
        }

        assert_eq!(*chain.submitted_nonces.lock().unwrap(), vec![3, 4, 5]);
        assert_eq!(task.nonce, 6);
    }

    #[tokio::test]
    async fn stale_nonce_is_refreshed_and_retried() {
        let chain = Arc::new(MockChain::default());
        *chain.nonce_at.lock().unwrap() = 9;
        *chain.send_script.lock().unwrap() = VecDeque::from([Err(ChainError::InvalidNonce)]);

        let mut task = owner_task(Arc::clone(&chain), 7);
        task.execute_transaction(execute_request(TARGET)).await.unwrap();

        // First attempt used the local nonce, the second the refreshed one.
        assert_eq!(*chain.submitted_nonces.lock().unwrap(), vec![7, 9]);
        assert_eq!(task.nonce, 10);
    }

    #[tokio::test]
    async fn gas_overflow_sentinel_aborts_before_submission() {
        let chain = Arc::new(MockChain::default());
        *chain.gas_estimate.lock().unwrap() = GAS_ESTIMATE_OVERFLOW;

        let mut task = owner_task(Arc::clone(&chain), 0);
        let err = task
            .execute_transaction(execute_request(TARGET))
            .await
            .unwrap_err();

        assert!(matches!(err, WalletError::EstimateGas(_)));
        assert_eq!(*chain.send_calls.lock().unwrap(), 0);
    }

    /// Records out-of-funds notifications for assertions.
    struct RecordingCallbacks {
        notified: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WalletCallbacks for RecordingCallbacks {
        async fn wallet_out_of_funds(&self, address: &str) {
            self.notified.lock().unwrap().push(address.to_string());
        }
    }

    #[tokio::test]
    async fn exceeds_balance_notifies_and_does_not_retry() {
        let chain = Arc::new(MockChain::default());
        *chain.send_script.lock().unwrap() = VecDeque::from([Err(ChainError::ExceedsBalance)]);

        let callbacks = Arc::new(RecordingCallbacks {
            notified: Mutex::new(Vec::new()),
        });
        let mut task = owner_task(Arc::clone(&chain), 0);
        task.callbacks = Arc::clone(&callbacks) as Arc<dyn WalletCallbacks>;

        let err = task
            .execute_transaction(execute_request(TARGET))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WalletError::SendTransaction(ChainError::ExceedsBalance)
        ));
        assert_eq!(*chain.send_calls.lock().unwrap(), 1);
        assert_eq!(*callbacks.notified.lock().unwrap(), vec![TARGET.to_string()]);
    }

    #[tokio::test]
    async fn exceeds_block_limit_is_terminal() {
        let chain = Arc::new(MockChain::default());
        *chain.send_script.lock().unwrap() = VecDeque::from([Err(ChainError::ExceedsBlockLimit)]);

        let mut task = owner_task(Arc::clone(&chain), 0);
        let err = task
            .execute_transaction(execute_request(TARGET))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WalletError::SendTransaction(ChainError::ExceedsBlockLimit)
        ));
        assert_eq!(*chain.send_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_receipt_surfaces_decoded_output() {
        let chain = Arc::new(MockChain::default());
        let output = format!("0x{}", alloy::hex::encode("out of gas"));
        *chain.send_script.lock().unwrap() = VecDeque::from([Ok(SendTransactionResponse {
            status: 0,
            output,
            hash: "0x0101010101010101010101010101010101010101010101010101010101010101"
                .to_string(),
        })]);

        let mut task = owner_task(Arc::clone(&chain), 0);
        let err = task
            .execute_transaction(execute_request(TARGET))
            .await
            .unwrap_err();

        match err {
            WalletError::Execution { code, message } => {
                assert_eq!(code, codes::EXECUTION_FAILED);
                assert!(message.contains("status 0"));
                assert!(message.contains("out of gas"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn deploy_takes_contract_address_from_receipt() {
        let chain = Arc::new(MockChain::default());
        *chain.receipt.lock().unwrap() = Receipt {
            status: 1,
            contract_address: Some("0x00000000000000000000000000000000000000cc".to_string()),
        };

        let mut task = owner_task(Arc::clone(&chain), 0);
        let response = task.execute_transaction(execute_request("")).await.unwrap();

        assert_eq!(response.address, "0x00000000000000000000000000000000000000cc");
    }

    #[tokio::test]
    async fn spawned_owner_serialises_requests() {
        let chain = Arc::new(MockChain::default());
        let wallet = Wallet::from_hex_key(TEST_KEY, 1).unwrap();
        let owner = WalletOwner::spawn(
            wallet,
            0,
            Arc::clone(&chain) as Arc<dyn ChainClient>,
            Arc::new(LoggingCallbacks),
            CancellationToken::new(),
        );

        for _ in 0..2 {
            owner.execute(execute_request(TARGET)).await.unwrap();
        }

        assert_eq!(*chain.submitted_nonces.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn owner_signs_prepared_transactions() {
        let chain = Arc::new(MockChain::default());
        let wallet = Wallet::from_hex_key(TEST_KEY, 1).unwrap();
        let owner = WalletOwner::spawn(
            wallet,
            0,
            Arc::clone(&chain) as Arc<dyn ChainClient>,
            Arc::new(LoggingCallbacks),
            CancellationToken::new(),
        );

        let tx = TxLegacy {
            chain_id: Some(1),
            nonce: 5,
            gas_price: GAS_PRICE,
            gas_limit: 21_000,
            to: TxKind::Call(Address::from_str(TARGET).unwrap()),
            value: U256::ZERO,
            input: Bytes::new(),
        };

        let envelope = owner.sign(tx).await.unwrap();
        match envelope {
            TxEnvelope::Legacy(signed) => assert_eq!(signed.tx().nonce, 5),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pool_starts_one_owner_per_key() {
        let chain = Arc::new(MockChain::default());
        let keys = vec![
            TEST_KEY.to_string(),
            "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d".to_string(),
        ];

        let pool = WalletPool::start(
            &keys,
            Arc::clone(&chain) as Arc<dyn ChainClient>,
            Arc::new(LoggingCallbacks),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(pool.len(), 2);
        pool.execute(execute_request(TARGET)).await.unwrap();
    }
}
