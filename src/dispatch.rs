//! External event ingress: mirror first, then fan out to subscribers.

use alloy::primitives::Address;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{payload_hash, EffectResult, ExternalEvent, MailboxEvent};
use crate::mailbox::{MailboxManager, SubscriptionBook};
use crate::sync::StoreSynchronizer;

/// What happened to one external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Mirror store written (always `false` for OHLC).
    pub mirrored: bool,
    /// Number of strategy mailboxes the event was enqueued to.
    pub delivered: usize,
}

pub struct EventDispatcher {
    synchronizer: Arc<StoreSynchronizer>,
    subscriptions: Arc<SubscriptionBook>,
    mailboxes: Arc<MailboxManager>,
}

impl EventDispatcher {
    pub fn new(
        synchronizer: Arc<StoreSynchronizer>,
        subscriptions: Arc<SubscriptionBook>,
        mailboxes: Arc<MailboxManager>,
    ) -> Self {
        Self {
            synchronizer,
            subscriptions,
            mailboxes,
        }
    }

    /// Mirror the event (when it is mirrorable) and enqueue it for every
    /// active subscriber. A failed mirror update is logged; subscribers still
    /// receive the event.
    pub async fn dispatch_external(&self, event: ExternalEvent) -> DispatchOutcome {
        let mirrored = if event.is_mirrored() {
            match self.synchronizer.update(&event).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        chain_id = event.chain_id(),
                        subscription_type = %event.subscription_type(),
                        error = %e,
                        "Mirror update failed, mirror is stale until next update"
                    );
                    false
                }
            }
        } else {
            false
        };

        let subscription_type = event.subscription_type();
        let hash = payload_hash(&event.subscription_payload());
        let strategies = self.subscriptions.subscribers(subscription_type, &hash);
        if strategies.is_empty() {
            debug!(subscription_type = %subscription_type, payload_hash = %hash, "No subscribers");
            return DispatchOutcome {
                mirrored,
                delivered: 0,
            };
        }

        let delivered = self
            .mailboxes
            .dispatch_to_strategies(&strategies, MailboxEvent::external(event));
        debug!(subscription_type = %subscription_type, delivered, "External event dispatched");
        DispatchOutcome {
            mirrored,
            delivered,
        }
    }

    /// Route an effect result back to the strategy that requested it.
    pub fn dispatch_effect_result(&self, strategy: Address, result: EffectResult) {
        self.mailboxes
            .dispatch_to_strategy(strategy, MailboxEvent::effect_result(result));
    }
}
