pub mod adapters;
pub mod clients;
pub mod config;
pub mod contracts;
pub mod coordination;
pub mod dispatch;
pub mod domain;
pub mod effects;
pub mod error;
pub mod funding;
pub mod mailbox;
pub mod runtime;
pub mod services;
pub mod signing;
pub mod sync;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use dispatch::{DispatchOutcome, EventDispatcher};
pub use error::{OrchestratorError, Result};
pub use mailbox::{MailboxManager, MailboxStats, SubscriptionBook};
pub use runtime::{Collaborators, Orchestrator, RuntimeSettings};
pub use signing::{NonceManager, TransactionSubmitter, Wallet};
pub use sync::StoreSynchronizer;
