//! Effect requests emitted by strategies and the results reported back

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Kind of side-effecting operation a strategy can request.
///
/// Tags not known to this build parse into `Unknown` so that they can be
/// reported back as a failed result instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    AddLiquidity,
    RemoveLiquidity,
    CollectFees,
    Withdraw,
    Unknown(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AddLiquidity => "add_liquidity",
            Self::RemoveLiquidity => "remove_liquidity",
            Self::CollectFees => "collect_fees",
            Self::Withdraw => "withdraw",
            Self::Unknown(tag) => tag.as_str(),
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "add_liquidity" => Self::AddLiquidity,
            "remove_liquidity" => Self::RemoveLiquidity,
            "collect_fees" => Self::CollectFees,
            "withdraw" => Self::Withdraw,
            _ => Self::Unknown(tag.to_string()),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(ActionType::parse(&tag))
    }
}

/// Effect request waiting for an executor. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// Correlation key matching the eventual `EffectResult`.
    pub effect_id: B256,
    pub strategy_address: Address,
    pub action_type: ActionType,
    pub payload: JsonValue,
    pub queued_at: DateTime<Utc>,
}

impl QueuedAction {
    pub fn new(
        effect_id: B256,
        strategy: Address,
        action_type: ActionType,
        payload: JsonValue,
    ) -> Self {
        Self {
            effect_id,
            strategy_address: strategy,
            action_type,
            payload,
            queued_at: Utc::now(),
        }
    }
}

/// What a handler produced on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectOutcome {
    pub tx_hash: Option<B256>,
    pub result_data: JsonValue,
}

/// Outcome of one effect, delivered to the originating strategy's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectResult {
    pub effect_id: B256,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub result_data: JsonValue,
}

impl EffectResult {
    pub fn succeeded(effect_id: B256, outcome: EffectOutcome) -> Self {
        Self {
            effect_id,
            success: true,
            tx_hash: outcome.tx_hash,
            error_message: None,
            result_data: outcome.result_data,
        }
    }

    pub fn failed(effect_id: B256, error: impl Into<String>) -> Self {
        Self {
            effect_id,
            success: false,
            tx_hash: None,
            error_message: Some(error.into()),
            result_data: JsonValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_parse() {
        assert_eq!(ActionType::parse("add_liquidity"), ActionType::AddLiquidity);
        assert_eq!(ActionType::parse("COLLECT_FEES"), ActionType::CollectFees);
        assert_eq!(
            ActionType::parse("teleport"),
            ActionType::Unknown("teleport".to_string())
        );
    }

    #[test]
    fn test_unknown_action_type_survives_serde() {
        let action = QueuedAction::new(
            B256::repeat_byte(1),
            Address::ZERO,
            ActionType::parse("teleport"),
            serde_json::json!({}),
        );
        let raw = serde_json::to_string(&action).unwrap();
        assert!(raw.contains("\"actionType\":\"teleport\""));
        let back: QueuedAction = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.action_type, ActionType::Unknown("teleport".to_string()));
    }

    #[test]
    fn test_failed_result_has_no_tx() {
        let result = EffectResult::failed(B256::ZERO, "boom");
        assert!(!result.success);
        assert!(result.tx_hash.is_none());
        assert_eq!(result.error_message.as_deref(), Some("boom"));
    }
}
