use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::abi::{IBalanceStore, IPoolStore, IPositionStore};
use crate::clients::{read_call, LedgerClient, StoreAddresses};
use crate::domain::{
    address_key, BalanceEvent, ExternalEvent, PoolEvent, PoolState, PositionEvent, PositionState,
};
use crate::error::{OrchestratorError, Result};

/// Pushes observed pool, position and balance state into the ledger's mirror
/// stores as the system account.
///
/// Updates are last-write-wins snapshots, so replaying one is harmless. A
/// failed update is returned to the caller; nothing is retried here.
pub struct StoreSynchronizer {
    ledger: Arc<dyn LedgerClient>,
    gas_limit: u64,
    stores: OnceLock<StoreAddresses>,
    balance_locks: DashMap<(u64, Address, Address), Arc<Mutex<()>>>,
}

impl StoreSynchronizer {
    pub fn new(ledger: Arc<dyn LedgerClient>, gas_limit: u64) -> Self {
        Self {
            ledger,
            gas_limit,
            stores: OnceLock::new(),
            balance_locks: DashMap::new(),
        }
    }

    /// Serialize read-modify-write cycles on one mirrored balance. Every
    /// writer that derives the new balance from a read must hold this guard
    /// from the read until its write lands.
    pub async fn lock_balance(&self, chain_id: u64, holder: Address, token: Address) -> OwnedMutexGuard<()> {
        let lock = self
            .balance_locks
            .entry((chain_id, holder, token))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Resolve the three store addresses. Calling this again is a no-op.
    pub async fn initialize(&self) -> Result<StoreAddresses> {
        if let Some(stores) = self.stores.get() {
            return Ok(*stores);
        }
        let resolved = self.ledger.get_store_addresses().await?;
        let stores = *self.stores.get_or_init(|| resolved);
        info!(
            pool_store = %stores.pool_store,
            position_store = %stores.position_store,
            balance_store = %stores.balance_store,
            "Store synchronizer initialized"
        );
        Ok(stores)
    }

    pub fn is_initialized(&self) -> bool {
        self.stores.get().is_some()
    }

    fn stores(&self) -> Result<&StoreAddresses> {
        self.stores
            .get()
            .ok_or(OrchestratorError::NotInitialized("StoreSynchronizer"))
    }

    /// Mirror an external event. OHLC candles are delivered only, never stored.
    pub async fn update(&self, event: &ExternalEvent) -> Result<()> {
        match event {
            ExternalEvent::Pool(e) => self.update_pool(e).await,
            ExternalEvent::Position(e) => self.update_position(e).await,
            ExternalEvent::Balance(e) => self.update_balance(e).await,
            ExternalEvent::Ohlc(_) => {
                self.stores()?;
                Ok(())
            }
        }
    }

    pub async fn update_pool(&self, event: &PoolEvent) -> Result<()> {
        let store = self.stores()?.pool_store;
        let call = IPoolStore::updatePoolCall {
            chainId: U256::from(event.chain_id),
            pool: event.pool,
            sqrtPriceX96: event.state.sqrt_price_x96,
            tick: event.state.tick,
            liquidity: event.state.liquidity,
            feeGrowthGlobal0X128: event.state.fee_growth_global0_x128,
            feeGrowthGlobal1X128: event.state.fee_growth_global1_x128,
        };
        self.submit("pool", address_key(&event.pool), store, call.abi_encode())
            .await
    }

    pub async fn update_position(&self, event: &PositionEvent) -> Result<()> {
        let store = self.stores()?.position_store;
        let s = &event.state;
        let call = IPositionStore::updatePositionCall {
            chainId: U256::from(event.chain_id),
            positionId: event.position_id,
            owner: s.owner,
            pool: s.pool,
            tickLower: s.tick_lower,
            tickUpper: s.tick_upper,
            liquidity: s.liquidity,
            tokensOwed0: s.tokens_owed0,
            tokensOwed1: s.tokens_owed1,
        };
        self.submit("position", event.position_id.to_string(), store, call.abi_encode())
            .await
    }

    pub async fn update_balance(&self, event: &BalanceEvent) -> Result<()> {
        let store = self.stores()?.balance_store;
        let call = IBalanceStore::updateBalanceCall {
            chainId: U256::from(event.chain_id),
            holder: event.holder,
            token: event.token,
            balance: event.balance,
        };
        let entity = format!("{}/{}", address_key(&event.holder), address_key(&event.token));
        self.submit("balance", entity, store, call.abi_encode()).await
    }

    async fn submit(
        &self,
        store: &'static str,
        entity: String,
        to: Address,
        data: Vec<u8>,
    ) -> Result<()> {
        let outcome = self
            .ledger
            .call_as_system(to, Bytes::from(data), self.gas_limit)
            .await
            .map_err(|e| OrchestratorError::MirrorUpdate {
                store,
                entity: entity.clone(),
                reason: e.to_string(),
            })?;

        if !outcome.success {
            let reason = outcome.error.unwrap_or_else(|| "call reverted".to_string());
            error!(store, entity = %entity, reason = %reason, "Mirror update failed");
            return Err(OrchestratorError::MirrorUpdate {
                store,
                entity,
                reason,
            });
        }

        debug!(store, entity = %entity, gas_used = outcome.gas_used, "Mirror updated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Best-effort reads: `Ok(None)` covers both "never written" and a failed
    // read. Only missing initialization is an error.
    // -------------------------------------------------------------------------

    pub async fn get_pool_state(&self, chain_id: u64, pool: Address) -> Result<Option<PoolState>> {
        let store = self.stores()?.pool_store;
        let call = IPoolStore::getPoolCall {
            chainId: U256::from(chain_id),
            pool,
        };
        match read_call(self.ledger.as_ref(), store, &call).await {
            Ok(r) if r.updatedAt.is_zero() => Ok(None),
            Ok(r) => Ok(Some(PoolState {
                sqrt_price_x96: r.sqrtPriceX96,
                tick: r.tick,
                liquidity: r.liquidity,
                fee_growth_global0_x128: r.feeGrowthGlobal0X128,
                fee_growth_global1_x128: r.feeGrowthGlobal1X128,
            })),
            Err(e) => {
                warn!(chain_id, pool = %pool, error = %e, "Pool mirror read failed");
                Ok(None)
            }
        }
    }

    pub async fn get_position_state(
        &self,
        chain_id: u64,
        position_id: U256,
    ) -> Result<Option<PositionState>> {
        let store = self.stores()?.position_store;
        let call = IPositionStore::getPositionCall {
            chainId: U256::from(chain_id),
            positionId: position_id,
        };
        match read_call(self.ledger.as_ref(), store, &call).await {
            Ok(r) if r.updatedAt.is_zero() => Ok(None),
            Ok(r) => Ok(Some(PositionState {
                owner: r.owner,
                pool: r.pool,
                tick_lower: r.tickLower,
                tick_upper: r.tickUpper,
                liquidity: r.liquidity,
                tokens_owed0: r.tokensOwed0,
                tokens_owed1: r.tokensOwed1,
            })),
            Err(e) => {
                warn!(chain_id, position_id = %position_id, error = %e, "Position mirror read failed");
                Ok(None)
            }
        }
    }

    /// Mirrored balance. `None` means unknown, which is not the same as zero.
    pub async fn get_balance(
        &self,
        chain_id: u64,
        holder: Address,
        token: Address,
    ) -> Result<Option<U256>> {
        match self.read_balance(chain_id, holder, token).await {
            Err(OrchestratorError::NotInitialized(what)) => Err(OrchestratorError::NotInitialized(what)),
            Err(e) => {
                warn!(chain_id, holder = %holder, token = %token, error = %e, "Balance mirror read failed");
                Ok(None)
            }
            ok => ok,
        }
    }

    /// Like [`get_balance`](Self::get_balance) but read failures are
    /// returned, for callers that write back a value derived from the read.
    pub async fn read_balance(
        &self,
        chain_id: u64,
        holder: Address,
        token: Address,
    ) -> Result<Option<U256>> {
        let store = self.stores()?.balance_store;
        let call = IBalanceStore::getBalanceCall {
            chainId: U256::from(chain_id),
            holder,
            token,
        };
        let r = read_call(self.ledger.as_ref(), store, &call).await?;
        Ok((!r.updatedAt.is_zero()).then_some(r.balance))
    }
}
