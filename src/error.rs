use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI decoding error: {0}")]
    Abi(String),

    // Collaborator errors
    #[error("Chain error on {chain_id}: {source}")]
    Chain {
        chain_id: u64,
        #[source]
        source: ChainError,
    },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Mirror update failed for {store} ({entity}): {reason}")]
    MirrorUpdate {
        store: &'static str,
        entity: String,
        reason: String,
    },

    // Lifecycle errors
    #[error("{0} used before initialization")]
    NotInitialized(&'static str),

    #[error("Chain {0} is not initialized in the nonce manager")]
    ChainNotInitialized(u64),

    #[error("No RPC client configured for chain {0}")]
    UnknownChain(u64),

    // Nonce errors
    #[error("Nonce desync on chain {chain_id} ({kind}): {message}")]
    NonceDesync {
        chain_id: u64,
        kind: NonceErrorKind,
        message: String,
    },

    // Funding errors
    #[error("{0}")]
    Compliance(#[from] ComplianceRejection),

    #[error("Duplicate funding request {request_id} (last processed {last_processed})")]
    DuplicateRequest { request_id: u64, last_processed: u64 },

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    // Effect errors
    #[error("No handler registered for action type {0}")]
    UnknownActionType(String),

    #[error("Invalid effect payload: {0}")]
    InvalidPayload(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Address parsing error: {0}")]
    AddressParsing(String),

    // Crypto/signing errors
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Signature error: {0}")]
    Signature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn chain(chain_id: u64, source: ChainError) -> Self {
        OrchestratorError::Chain { chain_id, source }
    }

    /// Whether the caller may retry with a fresh nonce reservation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Chain {
                source: ChainError::Transport(_) | ChainError::Timeout(_) | ChainError::GasEstimation(_),
                ..
            } | OrchestratorError::Timeout(_)
        )
    }
}

/// Classification of chain-client nonce failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceErrorKind {
    TooLow,
    TooHigh,
    ReplacementUnderpriced,
    AlreadyKnown,
    AlreadyUsed,
}

impl NonceErrorKind {
    const MARKERS: &'static [(&'static str, NonceErrorKind)] = &[
        ("nonce too low", NonceErrorKind::TooLow),
        ("nonce too high", NonceErrorKind::TooHigh),
        (
            "replacement transaction underpriced",
            NonceErrorKind::ReplacementUnderpriced,
        ),
        ("already known", NonceErrorKind::AlreadyKnown),
        ("nonce has already been used", NonceErrorKind::AlreadyUsed),
    ];

    /// Map provider error text to a nonce error kind.
    ///
    /// Only chain-client adapters call this; everything downstream matches on
    /// [`ChainError::Nonce`].
    pub fn classify(message: &str) -> Option<NonceErrorKind> {
        let lower = message.to_ascii_lowercase();
        Self::MARKERS
            .iter()
            .find(|(marker, _)| lower.contains(marker))
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NonceErrorKind::TooLow => "too_low",
            NonceErrorKind::TooHigh => "too_high",
            NonceErrorKind::ReplacementUnderpriced => "replacement_underpriced",
            NonceErrorKind::AlreadyKnown => "already_known",
            NonceErrorKind::AlreadyUsed => "already_used",
        }
    }
}

impl fmt::Display for NonceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type at the external chain RPC boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("nonce error ({kind}): {message}")]
    Nonce {
        kind: NonceErrorKind,
        message: String,
    },

    #[error("gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    /// Build an error from raw provider text, classifying nonce failures.
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match NonceErrorKind::classify(&message) {
            Some(kind) => ChainError::Nonce { kind, message },
            None => ChainError::Transport(message),
        }
    }
}

/// Machine-readable reason a funding or effect request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    TokenNotAllowed,
    EffectNotAllowed,
    IntentMissing,
    IntentInvalid,
}

impl RejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionCode::TokenNotAllowed => "TOKEN_NOT_ALLOWED",
            RejectionCode::EffectNotAllowed => "EFFECT_NOT_ALLOWED",
            RejectionCode::IntentMissing => "INTENT_MISSING",
            RejectionCode::IntentInvalid => "INTENT_INVALID",
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compliance check failure. No chain interaction happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ComplianceRejection {
    pub code: RejectionCode,
    pub message: String,
}

impl ComplianceRejection {
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
