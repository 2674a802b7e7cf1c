use alloy::primitives::{Address, B256, U256};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::coordination::ShutdownToken;
use crate::domain::{BalanceEvent, DetectedDeposit, ExternalEvent, MailboxEvent};
use crate::error::Result;
use crate::mailbox::MailboxManager;
use crate::sync::StoreSynchronizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    Credited { strategy: Address, balance: U256 },
    Duplicate,
    /// Sender is not a registered strategy owner.
    Unattributed,
    /// Older than the de-duplication window, so a credit could not be
    /// proven unique.
    Stale,
}

/// Credits transfers into the shared wallet to the strategy whose owner sent
/// them, then tells that strategy about its new balance.
///
/// Credited transfers are remembered for `window` blocks behind the newest
/// deposit seen on their chain; anything older is refused instead of being
/// credited a second time.
pub struct DepositWatcher {
    owners: DashMap<Address, Address>,
    /// Dedupe key to the block the transfer landed in.
    seen: DashMap<(u64, B256, Address), u64>,
    newest_block: DashMap<u64, u64>,
    window: u64,
    synchronizer: Arc<StoreSynchronizer>,
    mailboxes: Arc<MailboxManager>,
}

impl DepositWatcher {
    pub fn new(synchronizer: Arc<StoreSynchronizer>, mailboxes: Arc<MailboxManager>, window: u64) -> Self {
        Self {
            owners: DashMap::new(),
            seen: DashMap::new(),
            newest_block: DashMap::new(),
            window: window.max(1),
            synchronizer,
            mailboxes,
        }
    }

    pub fn register_owner(&self, owner: Address, strategy: Address) {
        if let Some(previous) = self.owners.insert(owner, strategy) {
            if previous != strategy {
                warn!(owner = %owner, previous = %previous, strategy = %strategy, "Owner re-registered to a different strategy");
            }
        }
    }

    pub fn unregister_strategy(&self, strategy: Address) {
        self.owners.retain(|_, s| *s != strategy);
    }

    pub fn strategy_for(&self, owner: Address) -> Option<Address> {
        self.owners.get(&owner).map(|s| *s)
    }

    /// Credit one deposit. A balance never written counts as zero here, since
    /// the deposit itself establishes it; a failed read aborts the credit.
    pub async fn process(&self, deposit: &DetectedDeposit) -> Result<DepositOutcome> {
        let Some(strategy) = self.strategy_for(deposit.from) else {
            warn!(
                chain_id = deposit.chain_id,
                from = %deposit.from,
                tx_hash = %deposit.tx_hash,
                "Deposit from unregistered owner"
            );
            return Ok(DepositOutcome::Unattributed);
        };

        if deposit.block_number < self.horizon(deposit.chain_id) {
            warn!(
                chain_id = deposit.chain_id,
                block = deposit.block_number,
                tx_hash = %deposit.tx_hash,
                "Deposit older than the dedupe window, not credited"
            );
            return Ok(DepositOutcome::Stale);
        }

        let key = deposit.dedupe_key();
        if self.seen.insert(key, deposit.block_number).is_some() {
            debug!(tx_hash = %deposit.tx_hash, "Deposit already credited");
            return Ok(DepositOutcome::Duplicate);
        }
        self.advance(deposit.chain_id, deposit.block_number);

        match self.credit(strategy, deposit).await {
            Ok(event) => {
                info!(
                    strategy = %strategy,
                    chain_id = deposit.chain_id,
                    token = %deposit.token,
                    amount = %deposit.amount,
                    balance = %event.balance,
                    "Deposit credited"
                );
                let balance = event.balance;
                self.mailboxes.dispatch_to_strategy(
                    strategy,
                    MailboxEvent::external(ExternalEvent::Balance(event)),
                );
                Ok(DepositOutcome::Credited { strategy, balance })
            }
            Err(e) => {
                // Not credited, so a redelivery may try again.
                self.seen.remove(&key);
                Err(e)
            }
        }
    }

    /// Lowest block still covered by the dedupe window on `chain_id`.
    fn horizon(&self, chain_id: u64) -> u64 {
        self.newest_block
            .get(&chain_id)
            .map(|newest| newest.saturating_sub(self.window))
            .unwrap_or(0)
    }

    /// Record `block` as seen and forget transfers that fell out of the window.
    fn advance(&self, chain_id: u64, block: u64) {
        let advanced = {
            let mut newest = self.newest_block.entry(chain_id).or_insert(block);
            if block > *newest {
                *newest = block;
                true
            } else {
                false
            }
        };
        if advanced {
            let horizon = block.saturating_sub(self.window);
            let before = self.seen.len();
            self.seen
                .retain(|(chain, _, _), landed| *chain != chain_id || *landed >= horizon);
            let pruned = before.saturating_sub(self.seen.len());
            if pruned > 0 {
                debug!(chain_id, horizon, pruned, "Pruned remembered deposits");
            }
        }
    }

    /// Transfers currently remembered for de-duplication.
    pub fn remembered(&self) -> usize {
        self.seen.len()
    }

    async fn credit(&self, strategy: Address, deposit: &DetectedDeposit) -> Result<BalanceEvent> {
        let _guard = self
            .synchronizer
            .lock_balance(deposit.chain_id, strategy, deposit.token)
            .await;
        let current = self
            .synchronizer
            .read_balance(deposit.chain_id, strategy, deposit.token)
            .await?
            .unwrap_or_default();

        let event = BalanceEvent {
            chain_id: deposit.chain_id,
            holder: strategy,
            token: deposit.token,
            balance: current.saturating_add(deposit.amount),
        };
        self.synchronizer.update_balance(&event).await?;
        Ok(event)
    }

    /// Consume detections until the channel closes or shutdown is requested.
    pub async fn run(self: Arc<Self>, mut deposits: mpsc::Receiver<DetectedDeposit>, mut token: ShutdownToken) {
        info!("Deposit watcher started");
        loop {
            let deposit = tokio::select! {
                _ = token.wait_for_shutdown() => break,
                next = deposits.recv() => match next {
                    Some(deposit) => deposit,
                    None => break,
                },
            };
            if let Err(e) = self.process(&deposit).await {
                error!(tx_hash = %deposit.tx_hash, error = %e, "Deposit processing failed");
            }
        }
        info!("Deposit watcher stopped");
    }
}
