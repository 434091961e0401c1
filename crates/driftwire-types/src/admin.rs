//! Operator admin commands and the admin-job-type mirror enum.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::changefeed::ChangefeedId;

/// Kind of an operator command addressed to one changefeed.
///
/// `Finish` is internal-only: it is produced when the feed reports logical
/// completion, never accepted from external callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminJobKind {
    Stop,
    Resume,
    Remove,
    Finish,
}

impl AdminJobKind {
    /// Wire-format string for storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Resume => "resume",
            Self::Remove => "remove",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for AdminJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last admin transition, mirrored onto persisted info and status so other
/// controller components observe it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminJobType {
    #[default]
    None,
    Stop,
    Resume,
    Remove,
    Finish,
}

impl AdminJobType {
    /// Wire-format string for storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Stop => "stop",
            Self::Resume => "resume",
            Self::Remove => "remove",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for AdminJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator command queued for one changefeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminJob {
    pub id: ChangefeedId,
    pub kind: AdminJobKind,
    /// On `Resume`, a non-zero value rewinds the replication offset and all
    /// status timestamps to this point. Zero means not set.
    #[serde(default)]
    pub overwrite_checkpoint_ts: u64,
}

impl AdminJob {
    /// A job with no checkpoint overwrite.
    #[must_use]
    pub fn new(id: ChangefeedId, kind: AdminJobKind) -> Self {
        Self {
            id,
            kind,
            overwrite_checkpoint_ts: 0,
        }
    }
}
