//! Per-changefeed control-plane state manager.
//!
//! The controller's outer reconciliation loop owns one
//! [`FeedStateManager`] per changefeed and calls [`FeedStateManager::tick`]
//! serially each round. The manager reconciles admin commands, processor
//! fault reports, and persisted feed state into patch intents plus the
//! derived should-run / should-remove flags, and governs restart backoff
//! after faults. It performs no I/O except the bounded epoch oracle call.

pub mod backoff;
pub mod epoch;
pub mod manager;
pub mod queue;
pub mod window;

pub use backoff::{BackoffConfig, ErrorBackoff};
pub use epoch::{TsOracle, compose_ts, generate_epoch};
pub use manager::FeedStateManager;
