//! In-memory stand-ins for the ledger, an external chain and the intent store.
#![allow(dead_code)]

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::Decodable2718;
use alloy::primitives::{address, keccak256, Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use liquidity_orchestrator::clients::{
    BlockTag, CallOutcome, ChainRpc, FeeEstimate, IntentStore, LedgerClient, StoreAddresses, TxCall, TxReceipt,
};
use liquidity_orchestrator::domain::{AllowedCurrency, AllowedEffect, StrategyIntent};
use liquidity_orchestrator::error::{ChainError, OrchestratorError, Result};
use liquidity_orchestrator::sync::abi::{IBalanceStore, IPoolStore, IPositionStore};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const POOL_STORE: Address = address!("0000000000000000000000000000000000000a01");
pub const POSITION_STORE: Address = address!("0000000000000000000000000000000000000a02");
pub const BALANCE_STORE: Address = address!("0000000000000000000000000000000000000a03");

/// Hardhat/anvil development keys.
pub const WALLET_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const OWNER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub const STRATEGY_1: Address = address!("00000000000000000000000000000000000000a1");
pub const STRATEGY_2: Address = address!("00000000000000000000000000000000000000a2");
pub const TOKEN_AAA: Address = address!("0000000000000000000000000000000000000aaa");
pub const TOKEN_BBB: Address = address!("0000000000000000000000000000000000000bbb");

// =============================================================================
// Ledger
// =============================================================================

/// Ledger that applies store writes to maps and records every other call.
#[derive(Default)]
pub struct InMemoryLedger {
    pools: Mutex<HashMap<(U256, Address), IPoolStore::updatePoolCall>>,
    positions: Mutex<HashMap<(U256, U256), IPositionStore::updatePositionCall>>,
    balances: Mutex<HashMap<(U256, Address, Address), U256>>,
    /// Non-store calls: strategy callbacks.
    pub callbacks: Mutex<Vec<(Address, Bytes)>>,
    pub store_writes: AtomicU64,
    failing_targets: Mutex<HashSet<Address>>,
    reads_fail: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls to `target` come back reverted.
    pub fn fail_calls_to(&self, target: Address) {
        self.failing_targets.lock().unwrap().insert(target);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.reads_fail.store(fail, Ordering::SeqCst);
    }

    pub fn seed_balance(&self, chain_id: u64, holder: Address, token: Address, balance: U256) {
        self.balances
            .lock()
            .unwrap()
            .insert((U256::from(chain_id), holder, token), balance);
    }

    pub fn balance(&self, chain_id: u64, holder: Address, token: Address) -> Option<U256> {
        self.balances
            .lock()
            .unwrap()
            .get(&(U256::from(chain_id), holder, token))
            .copied()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().unwrap().len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.lock().unwrap().len()
    }

    pub fn balance_count(&self) -> usize {
        self.balances.lock().unwrap().len()
    }

    pub fn callbacks_to(&self, target: Address) -> Vec<Bytes> {
        self.callbacks
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == target)
            .map(|(_, data)| data.clone())
            .collect()
    }

    fn apply_store_write(&self, to: Address, data: &[u8]) -> std::result::Result<(), String> {
        match to {
            POOL_STORE => {
                let call = IPoolStore::updatePoolCall::abi_decode(data).map_err(|e| e.to_string())?;
                self.pools.lock().unwrap().insert((call.chainId, call.pool), call);
            }
            POSITION_STORE => {
                let call = IPositionStore::updatePositionCall::abi_decode(data).map_err(|e| e.to_string())?;
                self.positions
                    .lock()
                    .unwrap()
                    .insert((call.chainId, call.positionId), call);
            }
            BALANCE_STORE => {
                let call = IBalanceStore::updateBalanceCall::abi_decode(data).map_err(|e| e.to_string())?;
                self.balances
                    .lock()
                    .unwrap()
                    .insert((call.chainId, call.holder, call.token), call.balance);
            }
            _ => unreachable!("not a store"),
        }
        self.store_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn call_as_system(&self, to: Address, data: Bytes, _gas_limit: u64) -> Result<CallOutcome> {
        if self.failing_targets.lock().unwrap().contains(&to) {
            return Ok(CallOutcome::failed(21_000, "execution reverted"));
        }
        if [POOL_STORE, POSITION_STORE, BALANCE_STORE].contains(&to) {
            return Ok(match self.apply_store_write(to, &data) {
                Ok(()) => CallOutcome::ok(50_000),
                Err(e) => CallOutcome::failed(21_000, e),
            });
        }
        self.callbacks.lock().unwrap().push((to, data));
        Ok(CallOutcome::ok(30_000))
    }

    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes> {
        if self.reads_fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Ledger("read unavailable".into()));
        }
        let encoded = match to {
            POOL_STORE => {
                let call = IPoolStore::getPoolCall::abi_decode(&data)
                    .map_err(|e| OrchestratorError::Abi(e.to_string()))?;
                let ret = match self.pools.lock().unwrap().get(&(call.chainId, call.pool)) {
                    Some(p) => IPoolStore::getPoolReturn {
                        sqrtPriceX96: p.sqrtPriceX96,
                        tick: p.tick,
                        liquidity: p.liquidity,
                        feeGrowthGlobal0X128: p.feeGrowthGlobal0X128,
                        feeGrowthGlobal1X128: p.feeGrowthGlobal1X128,
                        updatedAt: U256::from(1u64),
                    },
                    None => IPoolStore::getPoolReturn {
                        sqrtPriceX96: U256::ZERO,
                        tick: 0,
                        liquidity: 0,
                        feeGrowthGlobal0X128: U256::ZERO,
                        feeGrowthGlobal1X128: U256::ZERO,
                        updatedAt: U256::ZERO,
                    },
                };
                IPoolStore::getPoolCall::abi_encode_returns(&ret)
            }
            POSITION_STORE => {
                let call = IPositionStore::getPositionCall::abi_decode(&data)
                    .map_err(|e| OrchestratorError::Abi(e.to_string()))?;
                let ret = match self.positions.lock().unwrap().get(&(call.chainId, call.positionId)) {
                    Some(p) => IPositionStore::getPositionReturn {
                        owner: p.owner,
                        pool: p.pool,
                        tickLower: p.tickLower,
                        tickUpper: p.tickUpper,
                        liquidity: p.liquidity,
                        tokensOwed0: p.tokensOwed0,
                        tokensOwed1: p.tokensOwed1,
                        updatedAt: U256::from(1u64),
                    },
                    None => IPositionStore::getPositionReturn {
                        owner: Address::ZERO,
                        pool: Address::ZERO,
                        tickLower: 0,
                        tickUpper: 0,
                        liquidity: 0,
                        tokensOwed0: 0,
                        tokensOwed1: 0,
                        updatedAt: U256::ZERO,
                    },
                };
                IPositionStore::getPositionCall::abi_encode_returns(&ret)
            }
            BALANCE_STORE => {
                let call = IBalanceStore::getBalanceCall::abi_decode(&data)
                    .map_err(|e| OrchestratorError::Abi(e.to_string()))?;
                let stored = self.balance_raw(call.chainId, call.holder, call.token);
                let ret = IBalanceStore::getBalanceReturn {
                    balance: stored.unwrap_or_default(),
                    updatedAt: U256::from(stored.is_some() as u64),
                };
                IBalanceStore::getBalanceCall::abi_encode_returns(&ret)
            }
            other => return Err(OrchestratorError::Ledger(format!("no readable contract at {}", other))),
        };
        Ok(encoded.into())
    }

    async fn get_store_addresses(&self) -> Result<StoreAddresses> {
        Ok(StoreAddresses {
            pool_store: POOL_STORE,
            position_store: POSITION_STORE,
            balance_store: BALANCE_STORE,
        })
    }
}

impl InMemoryLedger {
    fn balance_raw(&self, chain_id: U256, holder: Address, token: Address) -> Option<U256> {
        self.balances.lock().unwrap().get(&(chain_id, holder, token)).copied()
    }
}

// =============================================================================
// External chain
// =============================================================================

/// Chain that accepts every broadcast unless told otherwise.
pub struct FakeChain {
    chain_id: u64,
    pending_count: AtomicU64,
    fail_estimate: AtomicBool,
    revert_all: AtomicBool,
    send_errors: Mutex<VecDeque<ChainError>>,
    sent: Mutex<Vec<TxEnvelope>>,
    native_balance: Mutex<U256>,
    receipt_gate: Mutex<Option<Arc<Notify>>>,
    send_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeChain {
    pub fn new(chain_id: u64, pending_count: u64) -> Self {
        Self {
            chain_id,
            pending_count: AtomicU64::new(pending_count),
            fail_estimate: AtomicBool::new(false),
            revert_all: AtomicBool::new(false),
            send_errors: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            native_balance: Mutex::new(U256::ZERO),
            receipt_gate: Mutex::new(None),
            send_gate: Mutex::new(None),
        }
    }

    /// Park broadcasts before the node accepts them. The first handle is
    /// notified when a broadcast is parked, the second releases it.
    pub fn hold_sends(&self) -> (Arc<Notify>, Arc<Notify>) {
        let gate = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Park every receipt wait until the returned handle is notified.
    pub fn hold_receipts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.receipt_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_pending_count(&self, count: u64) {
        self.pending_count.store(count, Ordering::SeqCst);
    }

    pub fn fail_estimates(&self, fail: bool) {
        self.fail_estimate.store(fail, Ordering::SeqCst);
    }

    pub fn revert_all(&self, revert: bool) {
        self.revert_all.store(revert, Ordering::SeqCst);
    }

    /// The next broadcast fails with `error`.
    pub fn push_send_error(&self, error: ChainError) {
        self.send_errors.lock().unwrap().push_back(error);
    }

    pub fn set_native_balance(&self, balance: U256) {
        *self.native_balance.lock().unwrap() = balance;
    }

    pub fn sent_nonces(&self) -> Vec<u64> {
        self.sent.lock().unwrap().iter().map(|tx| tx.nonce()).collect()
    }

    pub fn sent(&self) -> Vec<TxEnvelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_transaction_count(&self, _address: Address, _block: BlockTag) -> std::result::Result<u64, ChainError> {
        Ok(self.pending_count.load(Ordering::SeqCst))
    }

    async fn estimate_gas(&self, _from: Address, _call: &TxCall) -> std::result::Result<u64, ChainError> {
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(ChainError::GasEstimation("execution reverted".into()));
        }
        Ok(60_000)
    }

    async fn fee_estimate(&self) -> std::result::Result<FeeEstimate, ChainError> {
        Ok(FeeEstimate {
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> std::result::Result<B256, ChainError> {
        if let Some(error) = self.send_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let gate = self.send_gate.lock().unwrap().take();
        if let Some((parked, release)) = gate {
            parked.notify_one();
            release.notified().await;
        }
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).map_err(|e| ChainError::Rejected(e.to_string()))?;
        self.sent.lock().unwrap().push(envelope);
        self.pending_count.fetch_add(1, Ordering::SeqCst);
        Ok(keccak256(&raw))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> std::result::Result<TxReceipt, ChainError> {
        let gate = self.receipt_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(TxReceipt {
            tx_hash,
            success: !self.revert_all.load(Ordering::SeqCst),
            gas_used: 55_000,
            block_number: Some(100),
        })
    }

    async fn get_balance(&self, _holder: Address, token: Address) -> std::result::Result<U256, ChainError> {
        if token == Address::ZERO {
            Ok(*self.native_balance.lock().unwrap())
        } else {
            Ok(U256::ZERO)
        }
    }
}

// =============================================================================
// Intents
// =============================================================================

#[derive(Default)]
pub struct StaticIntents {
    intents: Mutex<HashMap<Address, StrategyIntent>>,
}

impl StaticIntents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, intent: StrategyIntent) {
        self.intents.lock().unwrap().insert(intent.strategy_address, intent);
    }
}

#[async_trait]
impl IntentStore for StaticIntents {
    async fn get_intent(&self, strategy: Address) -> Result<Option<StrategyIntent>> {
        Ok(self.intents.lock().unwrap().get(&strategy).cloned())
    }
}

pub fn owner_signer() -> PrivateKeySigner {
    OWNER_KEY.parse().unwrap()
}

/// Intent for `strategy` signed by the owner key.
pub fn signed_intent(
    strategy: Address,
    currencies: Vec<AllowedCurrency>,
    effects: Vec<AllowedEffect>,
) -> StrategyIntent {
    let owner = owner_signer();
    let mut intent = StrategyIntent {
        strategy_address: strategy,
        owner_address: owner.address(),
        allowed_currencies: currencies,
        allowed_effects: effects,
        signature: Bytes::new(),
    };
    let signature = owner.sign_message_sync(intent.digest().as_slice()).unwrap();
    intent.signature = Bytes::from(signature.as_bytes().to_vec());
    intent
}
