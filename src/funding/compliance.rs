//! Intent compliance gate
//!
//! Every withdrawal, approval and contract-call effect passes through here
//! before a nonce is reserved. A rejection means no chain interaction.

use alloy::primitives::{Address, Selector};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::IntentStore;
use crate::domain::StrategyIntent;
use crate::error::{ComplianceRejection, RejectionCode, Result};

/// Check a token operation against a verified intent.
///
/// The `(chain, token)` pair must be an allowed currency. When `selector` is
/// given, `(chain, token, selector)` must also be an allowed effect; native
/// transfers carry no selector and need only the currency allowance.
pub fn check_compliance(
    intent: &StrategyIntent,
    chain_id: u64,
    token: Address,
    selector: Option<Selector>,
) -> std::result::Result<(), ComplianceRejection> {
    if !intent.allows_currency(chain_id, token) {
        return Err(ComplianceRejection::new(
            RejectionCode::TokenNotAllowed,
            format!("token {:#x} on chain {} is not in the intent", token, chain_id),
        ));
    }
    if let Some(selector) = selector {
        check_effect(intent, chain_id, token, selector)?;
    }
    Ok(())
}

/// Check a contract call against the intent's allowed effects.
pub fn check_effect(
    intent: &StrategyIntent,
    chain_id: u64,
    contract: Address,
    selector: Selector,
) -> std::result::Result<(), ComplianceRejection> {
    if intent.allows_effect(chain_id, contract, selector) {
        Ok(())
    } else {
        Err(ComplianceRejection::new(
            RejectionCode::EffectNotAllowed,
            format!(
                "selector {} on {:#x} (chain {}) is not in the intent",
                selector, contract, chain_id
            ),
        ))
    }
}

/// Loads and verifies intents, then applies the checks above.
pub struct ComplianceGate {
    intents: Arc<dyn IntentStore>,
}

impl ComplianceGate {
    pub fn new(intents: Arc<dyn IntentStore>) -> Self {
        Self { intents }
    }

    /// The strategy's intent, provided it exists and its signature recovers
    /// to the owner.
    pub async fn verified_intent(&self, strategy: Address) -> Result<StrategyIntent> {
        let intent = self.intents.get_intent(strategy).await?.ok_or_else(|| {
            ComplianceRejection::new(
                RejectionCode::IntentMissing,
                format!("no intent for strategy {:#x}", strategy),
            )
        })?;

        if !intent.verify() {
            warn!(strategy = %strategy, owner = %intent.owner_address, "Intent signature does not recover to owner");
            return Err(ComplianceRejection::new(
                RejectionCode::IntentInvalid,
                format!("intent signature for strategy {:#x} is invalid", strategy),
            )
            .into());
        }
        Ok(intent)
    }

    pub async fn check_token_operation(
        &self,
        strategy: Address,
        chain_id: u64,
        token: Address,
        selector: Option<Selector>,
    ) -> Result<StrategyIntent> {
        let intent = self.verified_intent(strategy).await?;
        check_compliance(&intent, chain_id, token, selector)?;
        debug!(strategy = %strategy, chain_id, token = %token, "Token operation compliant");
        Ok(intent)
    }

    pub async fn check_contract_call(
        &self,
        strategy: Address,
        chain_id: u64,
        contract: Address,
        selector: Selector,
    ) -> Result<StrategyIntent> {
        let intent = self.verified_intent(strategy).await?;
        check_effect(&intent, chain_id, contract, selector)?;
        Ok(intent)
    }
}
