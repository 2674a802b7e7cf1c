pub mod evm_chain;
pub mod intent_file;
pub mod ledger_processor;
pub mod ledger_rpc;

pub use evm_chain::EvmChainClient;
pub use intent_file::FileIntentStore;
pub use ledger_processor::{event_kind_code, LedgerEventProcessor};
pub use ledger_rpc::{RpcLedgerClient, BALANCE_STORE_KEY, POOL_STORE_KEY, POSITION_STORE_KEY};
