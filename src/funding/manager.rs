use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::compliance::ComplianceGate;
use crate::clients::{ChainClients, LedgerClient, TxCall};
use crate::contracts::{selector_of, IStrategyCallbacks, IERC20};
use crate::domain::{BalanceEvent, FundingOperation, FundingRequest, FundingResult};
use crate::error::{OrchestratorError, Result};
use crate::signing::TransactionSubmitter;
use crate::sync::StoreSynchronizer;

/// Executes strategy funding requests against the shared wallet
///
/// Every request is checked for replay, then for intent compliance, before a
/// nonce is touched. The outcome is reported back to the strategy through a
/// privileged `onFundingResult` call.
pub struct FundingManager {
    wallet: Address,
    chains: ChainClients,
    synchronizer: Arc<StoreSynchronizer>,
    compliance: Arc<ComplianceGate>,
    submitter: Arc<TransactionSubmitter>,
    ledger: Arc<dyn LedgerClient>,
    notify_gas_limit: u64,
    last_request: DashMap<Address, u64>,
    strategy_locks: DashMap<Address, Arc<tokio::sync::Mutex<()>>>,
}

impl FundingManager {
    pub fn new(
        chains: ChainClients,
        synchronizer: Arc<StoreSynchronizer>,
        compliance: Arc<ComplianceGate>,
        submitter: Arc<TransactionSubmitter>,
        ledger: Arc<dyn LedgerClient>,
        notify_gas_limit: u64,
    ) -> Self {
        Self {
            wallet: submitter.nonces().wallet(),
            chains,
            synchronizer,
            compliance,
            submitter,
            ledger,
            notify_gas_limit,
            last_request: DashMap::new(),
            strategy_locks: DashMap::new(),
        }
    }

    /// Last processed request id for a strategy.
    pub fn last_request_id(&self, strategy: Address) -> Option<u64> {
        self.last_request.get(&strategy).map(|id| *id)
    }

    /// Process one request to a terminal result. Requests of one strategy are
    /// handled one at a time, in arrival order.
    pub async fn handle_request(&self, request: FundingRequest) -> FundingResult {
        let strategy = request.strategy_address;
        let lock = self
            .strategy_locks
            .entry(strategy)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(last) = self.last_request_id(strategy) {
            if request.request_id <= last {
                let err = OrchestratorError::DuplicateRequest {
                    request_id: request.request_id,
                    last_processed: last,
                };
                warn!(strategy = %strategy, request_id = request.request_id, last, "Duplicate funding request ignored");
                return FundingResult::rejected(request.request_id, err.to_string());
            }
        }
        self.last_request.insert(strategy, request.request_id);

        info!(
            strategy = %strategy,
            request_id = request.request_id,
            operation = request.operation.name(),
            chain_id = request.operation.chain_id(),
            "Processing funding request"
        );

        let result = match self.execute(&request).await {
            Ok(tx_hash) => FundingResult::ok(request.request_id, tx_hash),
            Err(e) => {
                warn!(strategy = %strategy, request_id = request.request_id, error = %e, "Funding request failed");
                FundingResult::rejected(request.request_id, e.to_string())
            }
        };

        self.notify(strategy, &result).await;
        result
    }

    async fn execute(&self, request: &FundingRequest) -> Result<Option<B256>> {
        match &request.operation {
            FundingOperation::Withdraw {
                chain_id,
                token,
                amount,
            } => self.withdraw(request, *chain_id, *token, *amount).await.map(Some),
            FundingOperation::Approve {
                chain_id,
                token,
                spender,
                amount,
            } => self
                .approve(request, *chain_id, *token, *spender, *amount)
                .await
                .map(Some),
            FundingOperation::EthBalanceUpdate { chain_id } => {
                self.refresh_native_balance(*chain_id).await?;
                Ok(None)
            }
        }
    }

    async fn withdraw(
        &self,
        request: &FundingRequest,
        chain_id: u64,
        token: Address,
        amount: U256,
    ) -> Result<B256> {
        let strategy = request.strategy_address;
        let native = token == Address::ZERO;
        let selector = (!native).then(selector_of::<IERC20::transferCall>);

        let intent = self
            .compliance
            .check_token_operation(strategy, chain_id, token, selector)
            .await?;
        ensure_owner(request, intent.owner_address)?;

        // Held until the debit is written. Deposit credits take the same lock.
        let _balance_guard = self.synchronizer.lock_balance(chain_id, strategy, token).await;
        let balance = self
            .synchronizer
            .get_balance(chain_id, strategy, token)
            .await?
            .ok_or_else(|| {
                OrchestratorError::InsufficientBalance(format!(
                    "balance of {:#x} on chain {} is unknown",
                    token, chain_id
                ))
            })?;
        if balance < amount {
            return Err(OrchestratorError::InsufficientBalance(format!(
                "requested {} but mirrored balance is {}",
                amount, balance
            )));
        }

        let call = if native {
            TxCall::native_transfer(intent.owner_address, amount)
        } else {
            let data = IERC20::transferCall {
                to: intent.owner_address,
                amount,
            }
            .abi_encode();
            TxCall::new(token, data)
        };
        let receipt = self.submitter.submit(chain_id, call).await?;

        let remaining = BalanceEvent {
            chain_id,
            holder: strategy,
            token,
            balance: balance - amount,
        };
        if let Err(e) = self.synchronizer.update_balance(&remaining).await {
            error!(strategy = %strategy, tx_hash = %receipt.tx_hash, error = %e, "Withdrawal sent but balance mirror not updated");
        }
        Ok(receipt.tx_hash)
    }

    async fn approve(
        &self,
        request: &FundingRequest,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<B256> {
        let intent = self
            .compliance
            .check_token_operation(
                request.strategy_address,
                chain_id,
                token,
                Some(selector_of::<IERC20::approveCall>()),
            )
            .await?;
        ensure_owner(request, intent.owner_address)?;

        let data = IERC20::approveCall { spender, amount }.abi_encode();
        let receipt = self.submitter.submit(chain_id, TxCall::new(token, data)).await?;
        Ok(receipt.tx_hash)
    }

    /// Mirror the shared wallet's native balance on `chain_id`.
    pub async fn refresh_native_balance(&self, chain_id: u64) -> Result<U256> {
        let client = self.chains.get(chain_id)?;
        let balance = client
            .get_balance(self.wallet, Address::ZERO)
            .await
            .map_err(|e| OrchestratorError::chain(chain_id, e))?;

        self.synchronizer
            .update_balance(&BalanceEvent {
                chain_id,
                holder: self.wallet,
                token: Address::ZERO,
                balance,
            })
            .await?;
        debug!(chain_id, wallet = %self.wallet, balance = %balance, "Native balance mirrored");
        Ok(balance)
    }

    async fn notify(&self, strategy: Address, result: &FundingResult) {
        let call = IStrategyCallbacks::onFundingResultCall {
            requestId: U256::from(result.request_id),
            success: result.success,
            txHash: result.tx_hash.unwrap_or_default(),
            errorMessage: result.error_message.clone().unwrap_or_default(),
        };
        match self
            .ledger
            .call_as_system(strategy, Bytes::from(call.abi_encode()), self.notify_gas_limit)
            .await
        {
            Ok(outcome) if outcome.success => {
                debug!(strategy = %strategy, request_id = result.request_id, "Funding result delivered");
            }
            Ok(outcome) => warn!(
                strategy = %strategy,
                request_id = result.request_id,
                error = ?outcome.error,
                "onFundingResult reverted"
            ),
            Err(e) => warn!(
                strategy = %strategy,
                request_id = result.request_id,
                error = %e,
                "onFundingResult call failed"
            ),
        }
    }
}

fn ensure_owner(request: &FundingRequest, intent_owner: Address) -> Result<()> {
    if request.owner_address != intent_owner {
        return Err(OrchestratorError::Validation(format!(
            "request owner {:#x} does not match intent owner {:#x}",
            request.owner_address, intent_owner
        )));
    }
    Ok(())
}
