//! Funding requests, their results and detected deposits

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Funding operation requested by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FundingOperation {
    /// Send `amount` of `token` back to the strategy owner. The zero address
    /// denotes the native currency.
    Withdraw {
        chain_id: u64,
        token: Address,
        amount: U256,
    },
    /// Grant `spender` an ERC-20 allowance from the shared wallet.
    Approve {
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    },
    /// Refresh the mirrored native balance of the shared wallet.
    EthBalanceUpdate { chain_id: u64 },
}

impl FundingOperation {
    pub fn chain_id(&self) -> u64 {
        match self {
            FundingOperation::Withdraw { chain_id, .. }
            | FundingOperation::Approve { chain_id, .. }
            | FundingOperation::EthBalanceUpdate { chain_id } => *chain_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FundingOperation::Withdraw { .. } => "withdraw",
            FundingOperation::Approve { .. } => "approve",
            FundingOperation::EthBalanceUpdate { .. } => "eth_balance_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRequest {
    /// Strategy-assigned, monotonic per strategy.
    pub request_id: u64,
    pub strategy_address: Address,
    pub owner_address: Address,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub operation: FundingOperation,
}

/// Terminal outcome of a funding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingResult {
    pub request_id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FundingResult {
    pub fn ok(request_id: u64, tx_hash: Option<B256>) -> Self {
        Self {
            request_id,
            success: true,
            tx_hash,
            error_message: None,
        }
    }

    pub fn rejected(request_id: u64, error: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            tx_hash: None,
            error_message: Some(error.into()),
        }
    }
}

/// Transfer into the shared wallet observed on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedDeposit {
    pub chain_id: u64,
    pub token: Address,
    pub amount: U256,
    pub from: Address,
    pub tx_hash: B256,
    pub block_number: u64,
}

impl DetectedDeposit {
    /// A deposit is consumed once per `(chain, tx, token)`.
    pub fn dedupe_key(&self) -> (u64, B256, Address) {
        (self.chain_id, self.tx_hash, self.token)
    }
}
