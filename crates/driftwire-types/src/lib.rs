//! Shared model types for the driftwire control plane.
//!
//! Pure data: changefeed identity, feed lifecycle state, admin jobs, and
//! the structured running-error model. No I/O lives here so the state and
//! controller crates can share these types without circular dependencies.

pub mod admin;
pub mod changefeed;
pub mod error;

pub use admin::{AdminJob, AdminJobKind, AdminJobType};
pub use changefeed::{
    CaptureId, ChangefeedId, ChangefeedInfo, ChangefeedStatus, FeedState, TaskPosition,
};
pub use error::{CodeRegistryClassifier, ErrorClassifier, RunningError};
