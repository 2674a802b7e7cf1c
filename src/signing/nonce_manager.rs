use alloy::primitives::Address;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::clients::{BlockTag, ChainClients};
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy)]
struct ChainCounter {
    next: u64,
    /// Bumped on every load from the network; a reservation taken under an
    /// older generation can no longer commit.
    generation: u64,
}

type Counters = Arc<Mutex<HashMap<u64, ChainCounter>>>;

fn lock_counters(counters: &Mutex<HashMap<u64, ChainCounter>>) -> MutexGuard<'_, HashMap<u64, ChainCounter>> {
    counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-chain nonce allocator for the shared signing wallet
///
/// Only a transaction that was actually broadcast consumes a nonce: callers
/// reserve, try to broadcast, then either [`NonceReservation::commit`] or
/// [`NonceReservation::release`].
///
/// # Example
/// ```rust,ignore
/// let reservation = nonces.reserve_nonce(1).await?;
/// match chain.send_raw_transaction(sign(reservation.nonce())).await {
///     Ok(_) => { reservation.commit(); }
///     Err(_) => reservation.release(),
/// }
/// ```
pub struct NonceManager {
    wallet: Address,
    chains: ChainClients,
    counters: Counters,
    /// One outstanding reservation per chain.
    reservation_locks: DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
}

impl NonceManager {
    pub fn new(wallet: Address, chains: ChainClients) -> Self {
        Self {
            wallet,
            chains,
            counters: Arc::new(Mutex::new(HashMap::new())),
            reservation_locks: DashMap::new(),
        }
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    /// Load the pending-inclusive transaction count. Required before any
    /// reservation on this chain.
    pub async fn initialize_chain(&self, chain_id: u64) -> Result<u64> {
        let nonce = self.load_from_network(chain_id).await?;
        info!(chain_id, wallet = %self.wallet, nonce, "Nonce counter initialized");
        Ok(nonce)
    }

    /// Re-read the counter from the network after a nonce error. Any
    /// outstanding reservation becomes stale and its commit is skipped.
    pub async fn reset_chain(&self, chain_id: u64) -> Result<u64> {
        let previous = self.current_nonce(chain_id);
        let nonce = self.load_from_network(chain_id).await?;
        warn!(chain_id, wallet = %self.wallet, previous = ?previous, nonce, "Nonce counter reset from network");
        Ok(nonce)
    }

    async fn load_from_network(&self, chain_id: u64) -> Result<u64> {
        let client = self.chains.get(chain_id)?;
        let nonce = client
            .get_transaction_count(self.wallet, BlockTag::Pending)
            .await
            .map_err(|e| OrchestratorError::chain(chain_id, e))?;

        let mut counters = lock_counters(&self.counters);
        let generation = counters.get(&chain_id).map_or(0, |c| c.generation + 1);
        counters.insert(chain_id, ChainCounter { next: nonce, generation });
        Ok(nonce)
    }

    /// Hand out the current counter value without incrementing it.
    ///
    /// Waits while another reservation on the same chain is outstanding, so
    /// two callers never hold the same value.
    pub async fn reserve_nonce(&self, chain_id: u64) -> Result<NonceReservation> {
        if !self.is_initialized(chain_id) {
            return Err(OrchestratorError::ChainNotInitialized(chain_id));
        }

        let lock = self
            .reservation_locks
            .entry(chain_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        let counter = lock_counters(&self.counters)
            .get(&chain_id)
            .copied()
            .ok_or(OrchestratorError::ChainNotInitialized(chain_id))?;

        debug!(chain_id, nonce = counter.next, "Nonce reserved");
        Ok(NonceReservation {
            chain_id,
            nonce: counter.next,
            generation: counter.generation,
            counters: Arc::clone(&self.counters),
            _guard: guard,
        })
    }

    pub fn is_initialized(&self, chain_id: u64) -> bool {
        lock_counters(&self.counters).contains_key(&chain_id)
    }

    pub fn initialized_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = lock_counters(&self.counters).keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    /// Next nonce that would be handed out.
    pub fn current_nonce(&self, chain_id: u64) -> Option<u64> {
        lock_counters(&self.counters).get(&chain_id).map(|c| c.next)
    }

    /// Account for a nonce that was broadcast but could not be committed
    /// because the counter was reset meanwhile. The counter never falls back
    /// to or below a nonce already on the wire. Returns the counter value.
    pub fn note_broadcast(&self, chain_id: u64, nonce: u64) -> Option<u64> {
        let mut counters = lock_counters(&self.counters);
        let counter = counters.get_mut(&chain_id)?;
        if counter.next <= nonce {
            debug!(chain_id, nonce, previous = counter.next, "Counter moved past broadcast nonce");
            counter.next = nonce + 1;
        }
        Some(counter.next)
    }
}

/// An outstanding nonce. Dropping it without committing releases it.
#[must_use = "commit after broadcast or release"]
pub struct NonceReservation {
    chain_id: u64,
    nonce: u64,
    generation: u64,
    counters: Counters,
    _guard: OwnedMutexGuard<()>,
}

impl NonceReservation {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Consume the nonce. Returns `false` (and leaves the counter alone) when
    /// the counter was reset since this reservation was taken.
    pub fn commit(self) -> bool {
        let mut counters = lock_counters(&self.counters);
        match counters.get_mut(&self.chain_id) {
            Some(counter) if counter.generation == self.generation && counter.next == self.nonce => {
                counter.next += 1;
                debug!(chain_id = self.chain_id, nonce = self.nonce, "Nonce committed");
                true
            }
            current => {
                debug!(
                    chain_id = self.chain_id,
                    nonce = self.nonce,
                    current = ?current.map(|c| c.next),
                    "Counter changed since reservation, skip commit"
                );
                false
            }
        }
    }

    /// Give the nonce back unused.
    pub fn release(self) {
        debug!(chain_id = self.chain_id, nonce = self.nonce, "Nonce released");
    }
}

impl std::fmt::Debug for NonceReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceReservation")
            .field("chain_id", &self.chain_id)
            .field("nonce", &self.nonce)
            .field("generation", &self.generation)
            .finish()
    }
}
