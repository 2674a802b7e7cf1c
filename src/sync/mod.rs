//! Mirror store synchronization

pub mod abi;
mod synchronizer;

pub use synchronizer::StoreSynchronizer;
