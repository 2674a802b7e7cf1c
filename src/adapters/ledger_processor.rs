//! Delivers mailbox events to strategy contracts on the execution ledger.

use alloy::primitives::{Address, Bytes, B256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::{EventProcessor, LedgerClient};
use crate::contracts::IStrategyCallbacks;
use crate::domain::{payload_hash, EffectResult, ExternalEvent, MailboxEvent, SubscriptionKey, SubscriptionType};
use crate::error::{OrchestratorError, Result};
use crate::mailbox::SubscriptionBook;

/// Wire code for the `kind` argument of `onExternalEvent`.
pub fn event_kind_code(subscription_type: SubscriptionType) -> u8 {
    match subscription_type {
        SubscriptionType::Pool => 0,
        SubscriptionType::Position => 1,
        SubscriptionType::Balance => 2,
        SubscriptionType::Ohlc => 3,
    }
}

pub struct LedgerEventProcessor {
    ledger: Arc<dyn LedgerClient>,
    subscriptions: Arc<SubscriptionBook>,
    gas_limit: u64,
}

impl LedgerEventProcessor {
    pub fn new(ledger: Arc<dyn LedgerClient>, subscriptions: Arc<SubscriptionBook>, gas_limit: u64) -> Self {
        Self {
            ledger,
            subscriptions,
            gas_limit,
        }
    }

    async fn deliver_external(
        &self,
        strategy: Address,
        event: &ExternalEvent,
        subscription_type: SubscriptionType,
        subscription_payload: &serde_json::Value,
    ) -> Result<()> {
        let key = SubscriptionKey {
            strategy,
            subscription_type,
            payload_hash: payload_hash(subscription_payload),
        };
        let subscription_hash: B256 = key
            .payload_hash
            .parse()
            .map_err(|e| OrchestratorError::Internal(format!("bad payload hash: {}", e)))?;

        let call = IStrategyCallbacks::onExternalEventCall {
            kind: event_kind_code(subscription_type),
            subscriptionHash: subscription_hash,
            payload: Bytes::from(serde_json::to_vec(event)?),
        };

        let delivered = self
            .ledger
            .call_as_system(strategy, call.abi_encode().into(), self.gas_limit)
            .await
            .and_then(|outcome| {
                if outcome.success {
                    Ok(())
                } else {
                    Err(OrchestratorError::Ledger(
                        outcome.error.unwrap_or_else(|| "onExternalEvent reverted".into()),
                    ))
                }
            });

        match delivered {
            Ok(()) => {
                self.subscriptions.record_delivery_success(&key);
                Ok(())
            }
            Err(e) => {
                if self.subscriptions.record_delivery_failure(&key) {
                    warn!(
                        strategy = %strategy,
                        subscription_type = %subscription_type,
                        "Subscription disabled after repeated delivery failures"
                    );
                }
                Err(e)
            }
        }
    }

    async fn deliver_effect_result(&self, strategy: Address, result: &EffectResult) -> Result<()> {
        let call = IStrategyCallbacks::submitEffectResultCall {
            effectId: result.effect_id,
            success: result.success,
            txHash: result.tx_hash.unwrap_or_default(),
            errorMessage: result.error_message.clone().unwrap_or_default(),
            resultData: Bytes::from(serde_json::to_vec(&result.result_data)?),
        };
        let outcome = self
            .ledger
            .call_as_system(strategy, call.abi_encode().into(), self.gas_limit)
            .await?;
        if !outcome.success {
            return Err(OrchestratorError::Ledger(
                outcome.error.unwrap_or_else(|| "submitEffectResult reverted".into()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventProcessor for LedgerEventProcessor {
    async fn process(&self, strategy: Address, event: MailboxEvent) -> Result<()> {
        debug!(strategy = %strategy, kind = event.kind(), "Delivering to strategy");
        match &event {
            MailboxEvent::External {
                payload,
                subscription_type,
                subscription_payload,
            } => {
                self.deliver_external(strategy, payload, *subscription_type, subscription_payload)
                    .await
            }
            MailboxEvent::EffectResult { payload } => self.deliver_effect_result(strategy, payload).await,
        }
    }
}
