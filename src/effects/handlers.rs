//! Built-in contract-call handlers
//!
//! Each handler is pinned to one function selector. The payload names the
//! chain, target contract and calldata; the call is checked against the
//! strategy's intent and then broadcast through the shared submitter.

use alloy::primitives::{Address, Bytes, Selector, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

use super::registry::{EffectHandler, HandlerRegistry};
use crate::clients::TxCall;
use crate::contracts::{selector_of, INonfungiblePositionManager, IERC20};
use crate::domain::{ActionType, EffectOutcome, QueuedAction};
use crate::error::{OrchestratorError, Result};
use crate::funding::ComplianceGate;
use crate::signing::TransactionSubmitter;

/// `{ "chainId": 1, "to": "0x…", "data": "0x…", "value": "0x0" }`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCallPayload {
    pub chain_id: u64,
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
}

impl ContractCallPayload {
    pub fn parse(payload: &JsonValue) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| OrchestratorError::InvalidPayload(e.to_string()))
    }

    pub fn selector(&self) -> Option<Selector> {
        self.data.get(..4).map(Selector::from_slice)
    }
}

pub struct ContractCallHandler {
    action_type: ActionType,
    selector: Selector,
    /// Target contract is a token whose currency must also be allowed.
    token_call: bool,
    compliance: Arc<ComplianceGate>,
    submitter: Arc<TransactionSubmitter>,
}

impl ContractCallHandler {
    pub fn new(
        action_type: ActionType,
        selector: Selector,
        compliance: Arc<ComplianceGate>,
        submitter: Arc<TransactionSubmitter>,
    ) -> Self {
        Self {
            action_type,
            selector,
            token_call: false,
            compliance,
            submitter,
        }
    }

    pub fn add_liquidity(compliance: Arc<ComplianceGate>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self::new(
            ActionType::AddLiquidity,
            selector_of::<INonfungiblePositionManager::increaseLiquidityCall>(),
            compliance,
            submitter,
        )
    }

    pub fn remove_liquidity(compliance: Arc<ComplianceGate>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self::new(
            ActionType::RemoveLiquidity,
            selector_of::<INonfungiblePositionManager::decreaseLiquidityCall>(),
            compliance,
            submitter,
        )
    }

    pub fn collect_fees(compliance: Arc<ComplianceGate>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self::new(
            ActionType::CollectFees,
            selector_of::<INonfungiblePositionManager::collectCall>(),
            compliance,
            submitter,
        )
    }

    /// ERC-20 `transfer` out of the shared wallet.
    pub fn withdraw(compliance: Arc<ComplianceGate>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self {
            token_call: true,
            ..Self::new(
                ActionType::Withdraw,
                selector_of::<IERC20::transferCall>(),
                compliance,
                submitter,
            )
        }
    }

    pub fn action_type(&self) -> &ActionType {
        &self.action_type
    }
}

#[async_trait]
impl EffectHandler for ContractCallHandler {
    fn validate(&self, payload: &JsonValue) -> Result<()> {
        let call = ContractCallPayload::parse(payload)?;
        match call.selector() {
            Some(selector) if selector == self.selector => Ok(()),
            Some(selector) => Err(OrchestratorError::InvalidPayload(format!(
                "{} expects selector {}, got {}",
                self.action_type, self.selector, selector
            ))),
            None => Err(OrchestratorError::InvalidPayload(
                "calldata shorter than a function selector".to_string(),
            )),
        }
    }

    async fn execute(&self, action: &QueuedAction) -> Result<EffectOutcome> {
        let call = ContractCallPayload::parse(&action.payload)?;
        let strategy = action.strategy_address;

        if self.token_call {
            self.compliance
                .check_token_operation(strategy, call.chain_id, call.to, Some(self.selector))
                .await?;
        } else {
            self.compliance
                .check_contract_call(strategy, call.chain_id, call.to, self.selector)
                .await?;
        }

        let receipt = self
            .submitter
            .submit(
                call.chain_id,
                TxCall {
                    to: call.to,
                    data: call.data,
                    value: call.value,
                },
            )
            .await?;

        info!(
            effect_id = %action.effect_id,
            strategy = %strategy,
            action_type = %self.action_type,
            tx_hash = %receipt.tx_hash,
            "Effect executed"
        );
        Ok(EffectOutcome {
            tx_hash: Some(receipt.tx_hash),
            result_data: json!({
                "chainId": call.chain_id,
                "gasUsed": receipt.gas_used,
                "blockNumber": receipt.block_number,
            }),
        })
    }
}

/// Registry with the four built-in handlers.
pub fn default_registry(compliance: Arc<ComplianceGate>, submitter: Arc<TransactionSubmitter>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let handlers = [
        ContractCallHandler::add_liquidity(Arc::clone(&compliance), Arc::clone(&submitter)),
        ContractCallHandler::remove_liquidity(Arc::clone(&compliance), Arc::clone(&submitter)),
        ContractCallHandler::collect_fees(Arc::clone(&compliance), Arc::clone(&submitter)),
        ContractCallHandler::withdraw(compliance, submitter),
    ];
    for handler in handlers {
        registry.register(handler.action_type().clone(), Arc::new(handler));
    }
    registry
}
