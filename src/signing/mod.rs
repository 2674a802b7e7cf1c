pub mod nonce_manager;
pub mod submitter;
pub mod wallet;

pub use nonce_manager::{NonceManager, NonceReservation};
pub use submitter::TransactionSubmitter;
pub use wallet::{Wallet, PRIVATE_KEY_ENV};
