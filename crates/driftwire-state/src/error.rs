//! Reactor state error types.

/// Errors produced when applying patch closures.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A patch closure refused the latest value. Remaining patches in the
    /// same batch are discarded; recovery belongs to the persistence
    /// collaborator.
    #[error("patch closure failed: {0}")]
    PatchFailed(#[source] anyhow::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
