use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::info;
use zeroize::Zeroize;

use crate::clients::{TransactionSigner, UnsignedTx};
use crate::error::{OrchestratorError, Result};

/// Environment variable holding the shared wallet key.
pub const PRIVATE_KEY_ENV: &str = "ORCH_PRIVATE_KEY";

/// Shared signing wallet for external-chain transactions
///
/// # Security
/// The private key string is zeroized right after the signer is built and is
/// never stored on the struct.
#[derive(Clone)]
pub struct Wallet {
    inner: PrivateKeySigner,
}

impl Wallet {
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let mut secure_key = private_key.trim().trim_start_matches("0x").to_string();

        let parsed = secure_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| OrchestratorError::Wallet(format!("Invalid private key: {}", e)));

        secure_key.zeroize();
        let inner = parsed?;

        info!("Wallet initialized: {} (private key zeroized from memory)", inner.address());
        Ok(Self { inner })
    }

    /// Read the key from `ORCH_PRIVATE_KEY`.
    pub fn from_env() -> Result<Self> {
        let mut private_key = std::env::var(PRIVATE_KEY_ENV).map_err(|_| {
            OrchestratorError::Wallet(format!("{} environment variable not set", PRIVATE_KEY_ENV))
        })?;

        let result = Self::from_private_key(&private_key);
        private_key.zeroize();
        result
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign an EIP-1559 transaction and return its EIP-2718 encoding.
    pub fn sign_eip1559(&self, tx: &UnsignedTx) -> Result<Bytes> {
        let mut unsigned = TxEip1559 {
            chain_id: tx.chain_id,
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            to: TxKind::Call(tx.to),
            value: tx.value,
            access_list: Default::default(),
            input: tx.data.clone(),
        };

        let signature = self
            .inner
            .sign_transaction_sync(&mut unsigned)
            .map_err(|e| OrchestratorError::Signature(format!("Failed to sign transaction: {}", e)))?;

        let envelope: TxEnvelope = unsigned.into_signed(signature).into();
        Ok(Bytes::from(envelope.encoded_2718()))
    }
}

#[async_trait]
impl TransactionSigner for Wallet {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_transaction(&self, tx: &UnsignedTx) -> Result<Bytes> {
        self.sign_eip1559(tx)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish()
    }
}
