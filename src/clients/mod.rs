mod traits;

pub use traits::{
    processor_fn, read_call, BlockTag, CallOutcome, ChainClients, ChainRpc, EventProcessor, FeeEstimate,
    IntentStore, LedgerClient, StoreAddresses, TransactionSigner, TxCall, TxReceipt, UnsignedTx,
};

#[cfg(test)]
pub use traits::{MockIntentStore, MockLedgerClient};
