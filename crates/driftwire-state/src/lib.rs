//! Reactor state handle for one changefeed.
//!
//! [`ChangefeedReactorState`] holds the latest observed persisted records
//! and a journal of patch intents. The controller reads the records,
//! decides, and enqueues pure closures; the persistence collaborator
//! drains the journal and applies each closure against the latest stored
//! value under its own transactional discipline.

pub mod error;
pub mod patch;
pub mod reactor;

pub use error::{Result, StateError};
pub use patch::DataPatch;
pub use reactor::ChangefeedReactorState;
