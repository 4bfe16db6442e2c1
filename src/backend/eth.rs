// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain-backed backend implementation.
//!
//! Deploys and executions become wallet-owner transactions; code,
//! public-key and log operations go straight to the chain client.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    BackendClient, BackendError, DeployServiceRequest, DeployServiceResponse, ExecuteServiceRequest,
    ExecuteServiceResponse, GetCodeRequest, GetCodeResponse, GetPublicKeyRequest,
    GetPublicKeyResponse,
};
use crate::chain::{ChainClient, LogEntry, LogFilter};
use crate::wallet::{ExecuteRequest, WalletPool};

pub struct EthBackend {
    wallets: WalletPool,
    chain: Arc<dyn ChainClient>,
}

impl EthBackend {
    pub fn new(wallets: WalletPool, chain: Arc<dyn ChainClient>) -> Self {
        Self { wallets, chain }
    }
}

/// Decode a hex payload (with or without 0x prefix).
fn decode_payload(data: &str) -> Result<Vec<u8>, BackendError> {
    alloy::hex::decode(data).map_err(|e| BackendError::InvalidPayload(e.to_string()))
}

fn parse_address(address: &str) -> Result<Address, BackendError> {
    Address::from_str(address)
        .map_err(|e| BackendError::InvalidPayload(format!("invalid address {address:?}: {e}")))
}

#[async_trait]
impl BackendClient for EthBackend {
    async fn deploy_service(
        &self,
        request: DeployServiceRequest,
    ) -> Result<DeployServiceResponse, BackendError> {
        let data = decode_payload(&request.data)?;

        let response = self
            .wallets
            .execute(ExecuteRequest {
                id: request.id,
                address: String::new(),
                data,
            })
            .await?;

        Ok(DeployServiceResponse {
            address: response.address,
        })
    }

    async fn execute_service(
        &self,
        request: ExecuteServiceRequest,
    ) -> Result<ExecuteServiceResponse, BackendError> {
        if request.address.is_empty() {
            return Err(BackendError::InvalidPayload(
                "address is required to execute a service".to_string(),
            ));
        }
        let data = decode_payload(&request.data)?;

        let response = self
            .wallets
            .execute(ExecuteRequest {
                id: request.id,
                address: request.address,
                data,
            })
            .await?;

        Ok(ExecuteServiceResponse {
            address: response.address,
            output: response.output,
        })
    }

    async fn get_code(&self, request: GetCodeRequest) -> Result<GetCodeResponse, BackendError> {
        let address = parse_address(&request.address)?;
        let code = self.chain.code_at(address).await?;

        Ok(GetCodeResponse {
            address: request.address,
            code,
        })
    }

    async fn get_public_key(
        &self,
        request: GetPublicKeyRequest,
    ) -> Result<GetPublicKeyResponse, BackendError> {
        let address = parse_address(&request.address)?;
        let key = self.chain.public_key(address).await?;

        Ok(GetPublicKeyResponse {
            timestamp: key.timestamp,
            address: request.address,
            public_key: key.public_key,
            signature: key.signature,
        })
    }

    async fn subscribe_logs(
        &self,
        filter: LogFilter,
        shutdown: CancellationToken,
    ) -> Result<mpsc::Receiver<LogEntry>, BackendError> {
        Ok(self.chain.subscribe_logs(filter, shutdown).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::wallet::LoggingCallbacks;

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    async fn backend() -> EthBackend {
        let chain = Arc::new(MockChain::default());
        let wallets = WalletPool::start(
            &[TEST_KEY.to_string()],
            Arc::clone(&chain) as Arc<dyn ChainClient>,
            Arc::new(LoggingCallbacks),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        EthBackend::new(wallets, chain)
    }

    #[tokio::test]
    async fn deploy_runs_a_creation_transaction() {
        let backend = backend().await;
        let response = backend
            .deploy_service(DeployServiceRequest {
                id: 0,
                data: "0x01".to_string(),
            })
            .await
            .unwrap();

        // The mock chain reports this contract address in its receipt.
        assert_eq!(response.address, "0x00000000000000000000000000000000000000aa");
    }

    #[tokio::test]
    async fn execute_requires_an_address() {
        let backend = backend().await;
        let err = backend
            .execute_service(ExecuteServiceRequest {
                id: 0,
                address: String::new(),
                data: "0x01".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let backend = backend().await;
        let err = backend
            .deploy_service(DeployServiceRequest {
                id: 0,
                data: "zz".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn get_code_round_trips_the_address() {
        let backend = backend().await;
        let response = backend
            .get_code(GetCodeRequest {
                address: "0x00000000000000000000000000000000000000bb".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.address, "0x00000000000000000000000000000000000000bb");
        assert_eq!(response.code, "0x60606040");
    }
}
