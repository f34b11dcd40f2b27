//! Runtime plumbing
//!
//! Shutdown signalling and the bounded consumer executor.

pub mod executor;
pub mod shutdown;

pub use executor::{ConsumerExecutor, ExecutorConfig, ExecutorStateSnapshot};
pub use shutdown::ShutdownSignal;
