//! Funding: withdrawals, approvals, deposits and the intent compliance gate

pub mod compliance;
mod deposits;
mod manager;

pub use compliance::{check_compliance, check_effect, ComplianceGate};
pub use deposits::{DepositOutcome, DepositWatcher};
pub use manager::FundingManager;
