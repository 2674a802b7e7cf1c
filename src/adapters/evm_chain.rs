//! Alloy-backed RPC client for one external EVM chain.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::clients::{BlockTag, ChainRpc, FeeEstimate, TxCall, TxReceipt};
use crate::contracts::IERC20;
use crate::error::{ChainError, OrchestratorError, Result};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(180);

pub struct EvmChainClient {
    chain_id: u64,
    provider: DynProvider,
    receipt_timeout: Duration,
}

impl EvmChainClient {
    /// Connect over HTTP and check the node reports `chain_id`.
    pub async fn connect(chain_id: u64, rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| OrchestratorError::Validation(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        let reported = provider
            .get_chain_id()
            .await
            .map_err(|e| OrchestratorError::chain(chain_id, ChainError::Transport(e.to_string())))?;
        if reported != chain_id {
            return Err(OrchestratorError::Validation(format!(
                "RPC {} serves chain {}, expected {}",
                rpc_url, reported, chain_id
            )));
        }

        info!(chain_id, rpc_url, "Connected chain client");
        Ok(Self {
            chain_id,
            provider,
            receipt_timeout: RECEIPT_TIMEOUT,
        })
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    fn request(from: Option<Address>, call: &TxCall) -> TransactionRequest {
        let request = TransactionRequest::default()
            .to(call.to)
            .value(call.value)
            .input(TransactionInput::new(call.data.clone()));
        match from {
            Some(from) => request.from(from),
            None => request,
        }
    }
}

fn provider_error(e: impl std::fmt::Display) -> ChainError {
    ChainError::from_provider_message(e.to_string())
}

#[async_trait]
impl ChainRpc for EvmChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockTag,
    ) -> std::result::Result<u64, ChainError> {
        let count = self.provider.get_transaction_count(address);
        let count = match block {
            BlockTag::Latest => count.latest().await,
            BlockTag::Pending => count.pending().await,
        };
        count.map_err(provider_error)
    }

    async fn estimate_gas(&self, from: Address, call: &TxCall) -> std::result::Result<u64, ChainError> {
        self.provider
            .estimate_gas(Self::request(Some(from), call))
            .await
            .map_err(|e| match provider_error(e) {
                ChainError::Transport(message) => ChainError::GasEstimation(message),
                other => other,
            })
    }

    async fn fee_estimate(&self) -> std::result::Result<FeeEstimate, ChainError> {
        let fees = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(provider_error)?;
        Ok(FeeEstimate {
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> std::result::Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(provider_error)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> std::result::Result<TxReceipt, ChainError> {
        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => debug!(chain_id = self.chain_id, tx_hash = %tx_hash, "Receipt not yet available"),
                    Err(e) => return Err(provider_error(e)),
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        let receipt = tokio::time::timeout(self.receipt_timeout, poll)
            .await
            .map_err(|_| ChainError::Timeout(format!("no receipt for {} after {:?}", tx_hash, self.receipt_timeout)))??;

        Ok(TxReceipt {
            tx_hash,
            success: receipt.status(),
            gas_used: receipt.gas_used,
            block_number: receipt.block_number,
        })
    }

    async fn get_balance(&self, holder: Address, token: Address) -> std::result::Result<U256, ChainError> {
        if token == Address::ZERO {
            return self.provider.get_balance(holder).await.map_err(provider_error);
        }

        let call = IERC20::balanceOfCall { account: holder };
        let raw = self
            .provider
            .call(Self::request(None, &TxCall::new(token, call.abi_encode())))
            .await
            .map_err(provider_error)?;
        IERC20::balanceOfCall::abi_decode_returns(&raw).map_err(|e| ChainError::Rejected(e.to_string()))
    }
}
