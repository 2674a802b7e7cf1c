//! JSON-RPC client for the execution ledger.
//!
//! The ledger node keeps the system account unlocked, so privileged calls are
//! plain `eth_sendTransaction` from that account with a fixed gas limit.

use alloy::primitives::{keccak256, Address, Bytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::clients::{read_call, CallOutcome, LedgerClient, StoreAddresses};
use crate::error::{OrchestratorError, Result};
use crate::sync::abi::IStoreRegistry;

/// Registry keys are `keccak256` of these names.
pub const POOL_STORE_KEY: &str = "PoolStore";
pub const POSITION_STORE_KEY: &str = "PositionStore";
pub const BALANCE_STORE_KEY: &str = "BalanceStore";

pub struct RpcLedgerClient {
    provider: DynProvider,
    system_account: Address,
    registry: Address,
}

impl RpcLedgerClient {
    pub fn connect(rpc_url: &str, system_account: Address, registry: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| OrchestratorError::Validation(format!("Invalid ledger URL {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        info!(rpc_url, system_account = %system_account, registry = %registry, "Ledger client ready");
        Ok(Self {
            provider,
            system_account,
            registry,
        })
    }

    async fn resolve(&self, name: &str) -> Result<Address> {
        let key = keccak256(name.as_bytes());
        let address = read_call(self, self.registry, &IStoreRegistry::getAddressCall { key }).await?;
        if address == Address::ZERO {
            return Err(OrchestratorError::Ledger(format!("{} is not registered", name)));
        }
        Ok(address)
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn call_as_system(&self, to: Address, data: Bytes, gas_limit: u64) -> Result<CallOutcome> {
        let request = TransactionRequest::default()
            .from(self.system_account)
            .to(to)
            .gas_limit(gas_limit)
            .input(TransactionInput::new(data));

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| OrchestratorError::Ledger(e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| OrchestratorError::Ledger(e.to_string()))?;

        debug!(to = %to, tx_hash = %receipt.transaction_hash, gas_used = receipt.gas_used, "System call mined");
        Ok(if receipt.status() {
            CallOutcome::ok(receipt.gas_used)
        } else {
            CallOutcome::failed(receipt.gas_used, format!("reverted in {}", receipt.transaction_hash))
        })
    }

    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));
        self.provider
            .call(request)
            .await
            .map_err(|e| OrchestratorError::Ledger(e.to_string()))
    }

    async fn get_store_addresses(&self) -> Result<StoreAddresses> {
        Ok(StoreAddresses {
            pool_store: self.resolve(POOL_STORE_KEY).await?,
            position_store: self.resolve(POSITION_STORE_KEY).await?,
            balance_store: self.resolve(BALANCE_STORE_KEY).await?,
        })
    }
}
