//! Changefeed identity and persisted lifecycle records.
//!
//! [`ChangefeedInfo`], [`ChangefeedStatus`], and [`TaskPosition`] mirror the
//! documents the persistence layer stores; the controller only ever mutates
//! them through patch closures.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::admin::AdminJobType;
use crate::error::RunningError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of a changefeed: `(namespace, id)`, both non-empty and stable
/// for the lifetime of the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangefeedId {
    pub namespace: String,
    pub id: String,
}

impl ChangefeedId {
    /// Create a new changefeed identity.
    #[must_use]
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ChangefeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// Opaque identifier of a processor's host process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureId(String);

impl CaptureId {
    /// Create a new capture identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for CaptureId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Feed state
// ---------------------------------------------------------------------------

/// Lifecycle state of a changefeed.
///
/// `Warning` exists in the classification but is never written to
/// [`ChangefeedInfo::state`]; warnings only populate
/// [`ChangefeedInfo::warning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    /// Actively replicating.
    Normal,
    /// Transient fault; restart permitted after backoff.
    Error,
    /// Non-fatal condition recorded, still running.
    Warning,
    /// Paused by admin; no automatic resume.
    Stopped,
    /// Terminal fault, needs operator intervention.
    Failed,
    /// Normal logical completion.
    Finished,
    /// Marked for deletion; persistence will soon erase records.
    Removed,
}

impl FeedState {
    /// Wire-format string for storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Finished => "finished",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// Persisted changefeed metadata, owned by the persistence layer.
///
/// The controller mutates this only through patch closures; `state` and
/// `admin_job_type` stay consistent per the state-patch mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedInfo {
    pub state: FeedState,
    pub admin_job_type: AdminJobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunningError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<RunningError>,
    /// Monotonic tag stamped at each terminal transition; downstream
    /// observers use it to detect restarts.
    pub epoch: u64,
    /// Replication starting offset.
    pub start_ts: u64,
}

impl ChangefeedInfo {
    /// A fresh info record starting replication at `start_ts`.
    #[must_use]
    pub fn new(start_ts: u64) -> Self {
        Self {
            state: FeedState::Normal,
            admin_job_type: AdminJobType::None,
            error: None,
            warning: None,
            epoch: 0,
            start_ts,
        }
    }

    /// Effective checkpoint of the feed: the status checkpoint when a
    /// status record exists, else the configured starting offset.
    #[must_use]
    pub fn checkpoint_ts(&self, status: Option<&ChangefeedStatus>) -> u64 {
        status.map_or(self.start_ts, |s| s.checkpoint_ts)
    }
}

/// Persisted changefeed progress. `checkpoint_ts <= resolved_ts` in normal
/// operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedStatus {
    pub checkpoint_ts: u64,
    pub resolved_ts: u64,
    pub min_table_barrier_ts: u64,
    pub admin_job_type: AdminJobType,
}

impl ChangefeedStatus {
    /// A status record with all three timestamps set to `ts`, as written
    /// when an operator rewinds the feed on resume.
    #[must_use]
    pub fn at(ts: u64) -> Self {
        Self {
            checkpoint_ts: ts,
            resolved_ts: ts,
            min_table_barrier_ts: ts,
            admin_job_type: AdminJobType::None,
        }
    }
}

/// Per-processor persisted record of progress and last observed fault.
///
/// The controller clears `error` and `warning` after absorbing them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPosition {
    pub checkpoint_ts: u64,
    pub resolved_ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunningError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<RunningError>,
}
