//! Owner-signed strategy intent
//!
//! An intent enumerates exactly which currencies and which contract functions
//! may be used on the owner's behalf. Anything absent is forbidden.

use alloy::primitives::{keccak256, Address, Bytes, Selector, Signature, B256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedCurrency {
    pub chain_id: u64,
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedEffect {
    pub chain_id: u64,
    pub contract: Address,
    pub selector: Selector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyIntent {
    pub strategy_address: Address,
    pub owner_address: Address,
    #[serde(default)]
    pub allowed_currencies: Vec<AllowedCurrency>,
    #[serde(default)]
    pub allowed_effects: Vec<AllowedEffect>,
    /// 65-byte EIP-191 signature over [`StrategyIntent::digest`].
    #[serde(default)]
    pub signature: Bytes,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IntentBody<'a> {
    strategy_address: String,
    owner_address: String,
    allowed_currencies: &'a [AllowedCurrency],
    allowed_effects: &'a [AllowedEffect],
}

impl StrategyIntent {
    /// Keccak-256 of the canonical JSON body (everything but the signature).
    pub fn digest(&self) -> B256 {
        let body = IntentBody {
            strategy_address: format!("{:#x}", self.strategy_address),
            owner_address: format!("{:#x}", self.owner_address),
            allowed_currencies: &self.allowed_currencies,
            allowed_effects: &self.allowed_effects,
        };
        // Serializing plain structs of addresses and integers cannot fail.
        let encoded = serde_json::to_vec(&body).unwrap_or_default();
        keccak256(encoded)
    }

    /// Whether the signature recovers to the owner.
    pub fn verify(&self) -> bool {
        let Ok(signature) = Signature::try_from(self.signature.as_ref()) else {
            return false;
        };
        match signature.recover_address_from_msg(self.digest().as_slice()) {
            Ok(recovered) => recovered == self.owner_address,
            Err(_) => false,
        }
    }

    pub fn allows_currency(&self, chain_id: u64, token: Address) -> bool {
        self.allowed_currencies
            .iter()
            .any(|c| c.chain_id == chain_id && c.token == token)
    }

    pub fn allows_effect(&self, chain_id: u64, contract: Address, selector: Selector) -> bool {
        self.allowed_effects
            .iter()
            .any(|e| e.chain_id == chain_id && e.contract == contract && e.selector == selector)
    }
}
