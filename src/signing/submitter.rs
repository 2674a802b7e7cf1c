use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::nonce_manager::NonceManager;
use crate::clients::{ChainClients, TransactionSigner, TxCall, TxReceipt, UnsignedTx};
use crate::error::{ChainError, OrchestratorError, Result};

/// Headroom applied on top of the node's gas estimate, in percent.
const GAS_HEADROOM_PCT: u64 = 20;

/// The only path that signs for the shared wallet.
///
/// Reserve → estimate → sign → broadcast → commit, releasing the nonce on
/// any failure before the transaction reaches the network and resetting the
/// counter when the node reports a nonce error.
pub struct TransactionSubmitter {
    nonces: Arc<NonceManager>,
    chains: ChainClients,
    signer: Arc<dyn TransactionSigner>,
}

impl TransactionSubmitter {
    pub fn new(nonces: Arc<NonceManager>, chains: ChainClients, signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            nonces,
            chains,
            signer,
        }
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    /// Broadcast `call` on `chain_id` and wait for its receipt. A reverted
    /// transaction is an error carrying the tx hash.
    pub async fn submit(&self, chain_id: u64, call: TxCall) -> Result<TxReceipt> {
        let client = self.chains.get(chain_id)?;
        let from = self.signer.address();
        let reservation = self.nonces.reserve_nonce(chain_id).await?;
        let nonce = reservation.nonce();

        let gas = match client.estimate_gas(from, &call).await {
            Ok(gas) => gas,
            Err(e) => {
                reservation.release();
                warn!(chain_id, nonce, error = %e, "Gas estimation failed, nonce released");
                return Err(OrchestratorError::chain(chain_id, as_gas_estimation(e)));
            }
        };

        let fees = match client.fee_estimate().await {
            Ok(fees) => fees,
            Err(e) => {
                reservation.release();
                return Err(OrchestratorError::chain(chain_id, e));
            }
        };

        let unsigned = UnsignedTx {
            chain_id,
            nonce,
            to: call.to,
            data: call.data,
            value: call.value,
            gas_limit: gas.saturating_mul(100 + GAS_HEADROOM_PCT) / 100,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        };

        let raw = match self.signer.sign_transaction(&unsigned).await {
            Ok(raw) => raw,
            Err(e) => {
                reservation.release();
                return Err(e);
            }
        };

        let tx_hash = match client.send_raw_transaction(raw).await {
            Ok(hash) => hash,
            Err(ChainError::Nonce { kind, message }) => {
                warn!(chain_id, nonce, kind = %kind, message = %message, "Nonce error on broadcast, resetting counter");
                if let Err(e) = self.nonces.reset_chain(chain_id).await {
                    error!(chain_id, error = %e, "Nonce reset failed");
                }
                reservation.release();
                return Err(OrchestratorError::NonceDesync {
                    chain_id,
                    kind,
                    message,
                });
            }
            Err(e) => {
                reservation.release();
                return Err(OrchestratorError::chain(chain_id, e));
            }
        };

        if !reservation.commit() {
            let next = self.nonces.note_broadcast(chain_id, nonce);
            warn!(chain_id, nonce, next = ?next, tx_hash = %tx_hash, "Nonce counter reset during broadcast, commit skipped");
        }
        info!(chain_id, nonce, tx_hash = %tx_hash, to = %unsigned.to, "Transaction broadcast");

        let receipt = client
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|e| OrchestratorError::chain(chain_id, e))?;

        if !receipt.success {
            warn!(chain_id, tx_hash = %tx_hash, "Transaction reverted");
            return Err(OrchestratorError::chain(chain_id, ChainError::Reverted { tx_hash }));
        }
        debug!(chain_id, tx_hash = %tx_hash, gas_used = receipt.gas_used, "Transaction confirmed");
        Ok(receipt)
    }
}

fn as_gas_estimation(e: ChainError) -> ChainError {
    match e {
        ChainError::Transport(message) | ChainError::Rejected(message) => ChainError::GasEstimation(message),
        other => other,
    }
}
