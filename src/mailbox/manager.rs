//! Strategy → mailbox routing
//!
//! Fans events out to many strategies (processed concurrently) and funnels
//! effect results into a single strategy's mailbox.

use alloy::primitives::Address;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::queue::{Mailbox, MailboxSnapshot};
use crate::clients::EventProcessor;
use crate::domain::MailboxEvent;

/// Aggregate mailbox statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStats {
    pub mailboxes: usize,
    pub pending: usize,
    pub processing: usize,
    pub processed: u64,
    pub failed: u64,
}

impl std::fmt::Display for MailboxStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Mailboxes[{}, pending={}, processing={}, ok={}, failed={}]",
            self.mailboxes, self.pending, self.processing, self.processed, self.failed
        )
    }
}

pub struct MailboxManager {
    mailboxes: DashMap<Address, Arc<Mailbox>>,
    /// Removed mailboxes whose drain task is still running. A strategy that
    /// receives events again gets its retired mailbox back, so there is never
    /// more than one drain per strategy.
    retired: DashMap<Address, Arc<Mailbox>>,
    processor: Arc<dyn EventProcessor>,
}

impl MailboxManager {
    pub fn new(processor: Arc<dyn EventProcessor>) -> Self {
        Self {
            mailboxes: DashMap::new(),
            retired: DashMap::new(),
            processor,
        }
    }

    fn get_or_create(&self, strategy: Address) -> Arc<Mailbox> {
        self.mailboxes
            .entry(strategy)
            .or_insert_with(|| {
                // Lock order: `mailboxes` shard, then `retired`.
                if let Some((_, mailbox)) = self.retired.remove(&strategy) {
                    debug!(strategy = %strategy, "Reopening retired mailbox");
                    mailbox.reopen();
                    return mailbox;
                }
                debug!(strategy = %strategy, "Creating mailbox");
                Mailbox::new(strategy, Arc::clone(&self.processor))
            })
            .clone()
    }

    fn deliver(&self, strategy: Address, mut event: MailboxEvent) {
        loop {
            let mailbox = self.get_or_create(strategy);
            match mailbox.enqueue(event) {
                Ok(()) => return,
                Err(returned) => {
                    // Reaped between lookup and enqueue; drop the stale entry
                    // and retry against a fresh mailbox.
                    self.mailboxes
                        .remove_if(&strategy, |_, current| Arc::ptr_eq(current, &mailbox));
                    event = returned;
                }
            }
        }
    }

    /// Enqueue `event` for every listed strategy. Duplicate addresses receive
    /// the event once. Returns the number of mailboxes it was delivered to.
    pub fn dispatch_to_strategies(&self, strategies: &[Address], event: MailboxEvent) -> usize {
        let mut seen = HashSet::with_capacity(strategies.len());
        let targets: Vec<Address> = strategies
            .iter()
            .copied()
            .filter(|s| seen.insert(*s))
            .collect();

        if let Some((last, rest)) = targets.split_last() {
            for strategy in rest {
                self.deliver(*strategy, event.clone());
            }
            self.deliver(*last, event);
        }
        targets.len()
    }

    /// Single-target delivery, used for effect results.
    pub fn dispatch_to_strategy(&self, strategy: Address, event: MailboxEvent) {
        self.deliver(strategy, event);
    }

    /// Drop a strategy's mailbox. Events already queued in it are still
    /// delivered; later events for the strategy wait behind them.
    pub fn remove_mailbox(&self, strategy: Address) -> bool {
        match self.mailboxes.entry(strategy) {
            Entry::Occupied(entry) => {
                if entry.get().close() {
                    self.retired.insert(strategy, Arc::clone(entry.get()));
                }
                entry.remove();
                info!(strategy = %strategy, "Removed mailbox");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Remove mailboxes with no queued or in-flight work and no activity
    /// for `max_idle`.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let before = self.mailboxes.len();
        self.mailboxes
            .retain(|_, mailbox| !mailbox.close_if_idle(max_idle));
        let reaped = before.saturating_sub(self.mailboxes.len());
        self.retired.retain(|_, mailbox| mailbox.has_pending_work());
        if reaped > 0 {
            debug!(reaped, "Reaped idle mailboxes");
        }
        reaped
    }

    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn snapshot(&self, strategy: Address) -> Option<MailboxSnapshot> {
        self.mailboxes.get(&strategy).map(|m| m.snapshot())
    }

    pub fn get_stats(&self) -> MailboxStats {
        let mut stats = MailboxStats::default();
        for entry in self.mailboxes.iter() {
            let snapshot = entry.value().snapshot();
            stats.mailboxes += 1;
            stats.pending += snapshot.pending;
            stats.processing += usize::from(snapshot.processing);
            stats.processed += snapshot.processed;
            stats.failed += snapshot.failed;
        }
        stats
    }

    pub fn has_pending_work(&self) -> bool {
        self.mailboxes
            .iter()
            .chain(self.retired.iter())
            .any(|entry| entry.value().has_pending_work())
    }

    /// Wait for every mailbox to go idle. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration, poll_interval: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.has_pending_work() {
                tokio::time::sleep(poll_interval).await;
            }
        })
        .await
        .is_ok()
    }
}
