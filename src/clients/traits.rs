use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::domain::{MailboxEvent, StrategyIntent};
use crate::error::{ChainError, OrchestratorError, Result};

// =============================================================================
// Execution ledger
// =============================================================================

/// Result of a privileged ledger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub error: Option<String>,
}

impl CallOutcome {
    pub fn ok(gas_used: u64) -> Self {
        Self {
            success: true,
            gas_used,
            error: None,
        }
    }

    pub fn failed(gas_used: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            gas_used,
            error: Some(error.into()),
        }
    }
}

/// Addresses of the three mirror stores, resolved from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAddresses {
    pub pool_store: Address,
    pub position_store: Address,
    pub balance_store: Address,
}

/// Client for the embedded execution ledger hosting strategies and mirrors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit `data` to `to` as the privileged system account.
    async fn call_as_system(&self, to: Address, data: Bytes, gas_limit: u64) -> Result<CallOutcome>;

    /// Read-only call returning raw ABI-encoded output.
    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn get_store_addresses(&self) -> Result<StoreAddresses>;
}

/// Typed read: encode `call`, run it against `to` and decode its returns.
pub async fn read_call<C: SolCall>(
    ledger: &dyn LedgerClient,
    to: Address,
    call: &C,
) -> Result<C::Return> {
    let raw = ledger.read_contract(to, Bytes::from(call.abi_encode())).await?;
    C::abi_decode_returns(&raw).map_err(|e| OrchestratorError::Abi(e.to_string()))
}

// =============================================================================
// External chains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

/// Call the shared wallet wants to make on an external chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl TxCall {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }

    pub fn native_transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            data: Bytes::new(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

/// RPC client for one external chain.
///
/// Implementations classify provider errors into [`ChainError`] so that
/// nonce failures surface as [`ChainError::Nonce`].
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockTag,
    ) -> std::result::Result<u64, ChainError>;

    async fn estimate_gas(&self, from: Address, call: &TxCall) -> std::result::Result<u64, ChainError>;

    async fn fee_estimate(&self) -> std::result::Result<FeeEstimate, ChainError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> std::result::Result<B256, ChainError>;

    async fn wait_for_receipt(&self, tx_hash: B256) -> std::result::Result<TxReceipt, ChainError>;

    /// Balance of `holder`; the zero `token` means native currency.
    async fn get_balance(&self, holder: Address, token: Address) -> std::result::Result<U256, ChainError>;
}

/// RPC clients keyed by chain id.
#[derive(Clone, Default)]
pub struct ChainClients {
    clients: HashMap<u64, Arc<dyn ChainRpc>>,
}

impl ChainClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Arc<dyn ChainRpc>) {
        self.clients.insert(client.chain_id(), client);
    }

    pub fn with(mut self, client: Arc<dyn ChainRpc>) -> Self {
        self.insert(client);
        self
    }

    pub fn get(&self, chain_id: u64) -> Result<Arc<dyn ChainRpc>> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or(OrchestratorError::UnknownChain(chain_id))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// =============================================================================
// Signing
// =============================================================================

/// Fully specified EIP-1559 transaction awaiting a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Returns the broadcast-ready raw transaction.
    async fn sign_transaction(&self, tx: &UnsignedTx) -> Result<Bytes>;
}

// =============================================================================
// Intents
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn get_intent(&self, strategy: Address) -> Result<Option<StrategyIntent>>;
}

// =============================================================================
// Strategy-side event processing
// =============================================================================

/// Delivers one mailbox event to a strategy.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, strategy: Address, event: MailboxEvent) -> Result<()>;
}

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> EventProcessor for FnProcessor<F>
where
    F: Fn(Address, MailboxEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn process(&self, strategy: Address, event: MailboxEvent) -> Result<()> {
        (self.0)(strategy, event).await
    }
}

/// Wrap an async closure as an [`EventProcessor`].
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn EventProcessor>
where
    F: Fn(Address, MailboxEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}
