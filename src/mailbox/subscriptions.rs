//! In-memory subscription book
//!
//! Mirrors the persisted subscription rows and resolves the subscriber set for
//! an incoming event by `(type, payload_hash)`. Active rows are also indexed
//! by that pair so resolution does not scan the whole book.

use alloy::primitives::Address;
use chrono::Utc;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::domain::{Subscription, SubscriptionKey, SubscriptionType};

#[derive(Debug, Clone)]
struct Entry {
    subscription: Subscription,
    failure_streak: u32,
}

/// Subscription book keyed by identity `(strategy, type, payload)`.
pub struct SubscriptionBook {
    entries: DashMap<SubscriptionKey, Entry>,
    /// Active subscribers per `(type, payload_hash)`. Only touched while the
    /// matching `entries` shard is held.
    active: DashMap<(SubscriptionType, String), BTreeSet<Address>>,
    max_delivery_failures: u32,
}

impl SubscriptionBook {
    pub fn new(max_delivery_failures: u32) -> Self {
        Self {
            entries: DashMap::new(),
            active: DashMap::new(),
            max_delivery_failures: max_delivery_failures.max(1),
        }
    }

    /// Create or re-activate the subscription for this identity.
    pub fn subscribe(
        &self,
        strategy: Address,
        subscription_type: SubscriptionType,
        payload: JsonValue,
    ) -> Subscription {
        let candidate = Subscription::new(strategy, subscription_type, payload);
        let key = candidate.identity();

        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
            info!(
                strategy = %strategy,
                subscription_type = %subscription_type,
                payload_hash = %candidate.payload_hash,
                "Subscription created"
            );
            Entry {
                subscription: candidate.clone(),
                failure_streak: 0,
            }
        });

        if !entry.subscription.active {
            entry.subscription.active = true;
            entry.subscription.updated_at = Utc::now();
            entry.failure_streak = 0;
        }
        self.index_insert(&key);
        entry.subscription.clone()
    }

    /// Explicit unsubscribe removes the row.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        match self.entries.entry(key.clone()) {
            MapEntry::Occupied(entry) => {
                self.index_remove(key);
                entry.remove();
                true
            }
            MapEntry::Vacant(_) => false,
        }
    }

    pub fn disable(&self, key: &SubscriptionKey) -> bool {
        self.set_active(key, false)
    }

    pub fn enable(&self, key: &SubscriptionKey) -> bool {
        self.set_active(key, true)
    }

    fn set_active(&self, key: &SubscriptionKey, active: bool) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.subscription.active != active {
                    entry.subscription.active = active;
                    entry.subscription.updated_at = Utc::now();
                }
                if active {
                    entry.failure_streak = 0;
                    self.index_insert(key);
                } else {
                    self.index_remove(key);
                }
                true
            }
            None => false,
        }
    }

    /// Count a failed delivery. Returns `true` when this failure disabled the
    /// subscription.
    pub fn record_delivery_failure(&self, key: &SubscriptionKey) -> bool {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return false;
        };
        if !entry.subscription.active {
            return false;
        }

        entry.failure_streak += 1;
        debug!(
            strategy = %key.strategy,
            streak = entry.failure_streak,
            "Subscription delivery failed"
        );
        if entry.failure_streak >= self.max_delivery_failures {
            entry.subscription.active = false;
            entry.subscription.updated_at = Utc::now();
            self.index_remove(key);
            warn!(
                strategy = %key.strategy,
                subscription_type = %key.subscription_type,
                failures = entry.failure_streak,
                "Subscription disabled after repeated delivery failures"
            );
            return true;
        }
        false
    }

    pub fn record_delivery_success(&self, key: &SubscriptionKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.failure_streak = 0;
        }
    }

    fn index_insert(&self, key: &SubscriptionKey) {
        self.active
            .entry((key.subscription_type, key.payload_hash.clone()))
            .or_default()
            .insert(key.strategy);
    }

    fn index_remove(&self, key: &SubscriptionKey) {
        if let MapEntry::Occupied(mut slot) = self
            .active
            .entry((key.subscription_type, key.payload_hash.clone()))
        {
            slot.get_mut().remove(&key.strategy);
            if slot.get().is_empty() {
                slot.remove();
            }
        }
    }

    /// Active subscribers for `(type, payload_hash)`, sorted.
    pub fn subscribers(&self, subscription_type: SubscriptionType, payload_hash: &str) -> Vec<Address> {
        self.active
            .get(&(subscription_type, payload_hash.to_string()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.entries.get(key).map(|e| e.subscription.clone())
    }

    /// All subscriptions of one strategy, active or not.
    pub fn for_strategy(&self, strategy: Address) -> Vec<Subscription> {
        self.entries
            .iter()
            .filter(|e| e.key().strategy == strategy)
            .map(|e| e.subscription.clone())
            .collect()
    }

    /// Drop every row of an undeployed strategy.
    pub fn remove_strategy(&self, strategy: Address) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            if key.strategy != strategy {
                return true;
            }
            self.index_remove(key);
            false
        });
        before - self.entries.len()
    }

    /// Active row counts per subscription type.
    pub fn active_counts(&self) -> HashMap<SubscriptionType, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.iter().filter(|e| e.subscription.active) {
            *counts.entry(entry.key().subscription_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
