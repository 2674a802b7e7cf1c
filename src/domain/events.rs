//! Events delivered to strategy mailboxes
//!
//! External observations (pool, position, balance, candle) and effect results
//! share one closed `MailboxEvent` type so a mailbox drains a single ordered
//! stream per strategy.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::fmt;

use super::effects::EffectResult;

/// Lower-case `0x` hex form used for identity keys and subscription payloads.
pub fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Parse an address string regardless of its casing.
pub fn normalize_address(raw: &str) -> crate::error::Result<Address> {
    raw.trim()
        .to_ascii_lowercase()
        .parse::<Address>()
        .map_err(|e| crate::error::OrchestratorError::AddressParsing(format!("{raw}: {e}")))
}

// =============================================================================
// Mirror state snapshots
// =============================================================================

/// Concentrated-liquidity pool snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    pub fee_growth_global0_x128: U256,
    pub fee_growth_global1_x128: U256,
}

/// Liquidity position snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub owner: Address,
    pub pool: Address,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub tokens_owed0: u128,
    pub tokens_owed1: u128,
}

/// Single OHLC candle. Never mirrored, only delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub timeframe: String,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEvent {
    pub chain_id: u64,
    pub pool: Address,
    pub state: PoolState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEvent {
    pub chain_id: u64,
    pub position_id: U256,
    pub state: PositionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEvent {
    pub chain_id: u64,
    pub holder: Address,
    /// Zero address denotes the chain's native currency.
    pub token: Address,
    pub balance: U256,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OhlcEvent {
    pub chain_id: u64,
    pub pool: Address,
    pub candle: Candle,
}

/// Externally observed chain state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalEvent {
    Pool(PoolEvent),
    Position(PositionEvent),
    Balance(BalanceEvent),
    Ohlc(OhlcEvent),
}

impl ExternalEvent {
    pub fn chain_id(&self) -> u64 {
        match self {
            ExternalEvent::Pool(e) => e.chain_id,
            ExternalEvent::Position(e) => e.chain_id,
            ExternalEvent::Balance(e) => e.chain_id,
            ExternalEvent::Ohlc(e) => e.chain_id,
        }
    }

    pub fn subscription_type(&self) -> SubscriptionType {
        match self {
            ExternalEvent::Pool(_) => SubscriptionType::Pool,
            ExternalEvent::Position(_) => SubscriptionType::Position,
            ExternalEvent::Balance(_) => SubscriptionType::Balance,
            ExternalEvent::Ohlc(_) => SubscriptionType::Ohlc,
        }
    }

    /// Canonical payload a strategy subscribes with to receive this event.
    pub fn subscription_payload(&self) -> JsonValue {
        match self {
            ExternalEvent::Pool(e) => json!({
                "chainId": e.chain_id,
                "pool": address_key(&e.pool),
            }),
            ExternalEvent::Position(e) => json!({
                "chainId": e.chain_id,
                "positionId": e.position_id.to_string(),
            }),
            ExternalEvent::Balance(e) => json!({
                "chainId": e.chain_id,
                "holder": address_key(&e.holder),
                "token": address_key(&e.token),
            }),
            ExternalEvent::Ohlc(e) => json!({
                "chainId": e.chain_id,
                "pool": address_key(&e.pool),
                "timeframe": e.candle.timeframe,
            }),
        }
    }

    /// Whether the event updates a mirror store.
    pub fn is_mirrored(&self) -> bool {
        !matches!(self, ExternalEvent::Ohlc(_))
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Pool,
    Position,
    Balance,
    Ohlc,
}

impl SubscriptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::Position => "position",
            Self::Balance => "balance",
            Self::Ohlc => "ohlc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pool" => Some(Self::Pool),
            "position" => Some(Self::Position),
            "balance" => Some(Self::Balance),
            "ohlc" => Some(Self::Ohlc),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex SHA-256 of the canonical JSON form of a subscription payload.
///
/// `serde_json` objects are key-sorted, so equal payloads hash equally
/// regardless of construction order.
pub fn payload_hash(payload: &JsonValue) -> String {
    let canonical = payload.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// A strategy's interest in one stream of external events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub strategy_address: Address,
    pub subscription_type: SubscriptionType,
    pub payload: JsonValue,
    pub payload_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(strategy: Address, subscription_type: SubscriptionType, payload: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            strategy_address: strategy,
            subscription_type,
            payload_hash: payload_hash(&payload),
            payload,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity key: `(strategy, type, payload)`. The payload is represented
    /// by its hash, which is a pure function of the payload.
    pub fn identity(&self) -> SubscriptionKey {
        SubscriptionKey {
            strategy: self.strategy_address,
            subscription_type: self.subscription_type,
            payload_hash: self.payload_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub strategy: Address,
    pub subscription_type: SubscriptionType,
    pub payload_hash: String,
}

// =============================================================================
// Mailbox event
// =============================================================================

/// Unit of work owned by a strategy mailbox until consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailboxEvent {
    External {
        payload: ExternalEvent,
        subscription_type: SubscriptionType,
        subscription_payload: JsonValue,
    },
    EffectResult {
        payload: EffectResult,
    },
}

impl MailboxEvent {
    pub fn external(event: ExternalEvent) -> Self {
        MailboxEvent::External {
            subscription_type: event.subscription_type(),
            subscription_payload: event.subscription_payload(),
            payload: event,
        }
    }

    pub fn effect_result(result: EffectResult) -> Self {
        MailboxEvent::EffectResult { payload: result }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MailboxEvent::External { .. } => "external",
            MailboxEvent::EffectResult { .. } => "effect_result",
        }
    }

    /// Correlation id of an effect result, if this is one.
    pub fn effect_id(&self) -> Option<B256> {
        match self {
            MailboxEvent::EffectResult { payload } => Some(payload.effect_id),
            MailboxEvent::External { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn pool_event(tick: i32) -> ExternalEvent {
        ExternalEvent::Pool(PoolEvent {
            chain_id: 1,
            pool: address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640"),
            state: PoolState {
                sqrt_price_x96: U256::from(1u64) << 96,
                tick,
                liquidity: 1_000,
                fee_growth_global0_x128: U256::ZERO,
                fee_growth_global1_x128: U256::ZERO,
            },
        })
    }

    #[test]
    fn test_payload_hash_ignores_state() {
        let a = pool_event(100);
        let b = pool_event(-50);
        assert_eq!(
            payload_hash(&a.subscription_payload()),
            payload_hash(&b.subscription_payload())
        );
    }

    #[test]
    fn test_payload_hash_is_key_order_independent() {
        let a: JsonValue = serde_json::from_str(r#"{"chainId":1,"pool":"0xabc"}"#).unwrap();
        let b: JsonValue = serde_json::from_str(r#"{"pool":"0xabc","chainId":1}"#).unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_normalize_address_casing() {
        let upper = normalize_address("0x88E6A0C2DDD26FEEB64F039A2C41296FCB3F5640").unwrap();
        let lower = normalize_address("0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640").unwrap();
        assert_eq!(upper, lower);
        assert!(normalize_address("not-an-address").is_err());
    }

    #[test]
    fn test_ohlc_is_not_mirrored() {
        use rust_decimal_macros::dec;

        let ohlc = ExternalEvent::Ohlc(OhlcEvent {
            chain_id: 1,
            pool: Address::ZERO,
            candle: Candle {
                timeframe: "1h".to_string(),
                open_time: Utc::now(),
                open: dec!(1850.25),
                high: dec!(1862.10),
                low: dec!(1841.00),
                close: dec!(1855.75),
                volume: dec!(0),
            },
        });
        assert!(!ohlc.is_mirrored());
        assert!(pool_event(1).is_mirrored());
        assert_eq!(ohlc.subscription_type(), SubscriptionType::Ohlc);
    }

    #[test]
    fn test_mailbox_event_wraps_subscription_data() {
        let event = MailboxEvent::external(pool_event(100));
        match event {
            MailboxEvent::External {
                subscription_type,
                subscription_payload,
                ..
            } => {
                assert_eq!(subscription_type, SubscriptionType::Pool);
                assert_eq!(subscription_payload["chainId"], 1);
            }
            _ => panic!("expected external event"),
        }
    }
}
