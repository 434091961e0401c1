//! Running-error model and error-code classification.
//!
//! Processors report faults as [`RunningError`] values on their task
//! positions. The controller decides how to react through an
//! [`ErrorClassifier`]: fast-fail codes terminate the feed immediately,
//! unretryable codes terminate it after one observable `error` state, and
//! everything else is retried under backoff.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A fault reported by a processor, persisted on its task position until
/// the controller absorbs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningError {
    /// Address of the reporting process.
    pub source: String,
    /// Registry code, e.g. `CONN_RESET`.
    pub code: String,
    pub message: String,
}

impl RunningError {
    /// Create a new running error.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RunningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (reported by {})", self.code, self.message, self.source)
    }
}

/// Classification predicates over error codes, supplied by the embedding
/// controller.
pub trait ErrorClassifier: Send + Sync {
    /// The feed is unrecoverable and must stop immediately, skipping
    /// backoff entirely.
    fn is_fast_fail(&self, code: &str) -> bool;

    /// The feed must stop after the current handling round; the error is
    /// recorded and the feed passes through one observable `error` state
    /// before going terminal.
    fn is_unretryable(&self, code: &str) -> bool;
}

/// Default classifier backed by two static code sets.
///
/// The defaults cover the faults every deployment shares: data needed for
/// replication already garbage-collected upstream (fast-fail), and sink
/// misconfiguration that no retry can repair (unretryable).
#[derive(Debug, Clone)]
pub struct CodeRegistryClassifier {
    fast_fail: BTreeSet<String>,
    unretryable: BTreeSet<String>,
}

impl CodeRegistryClassifier {
    /// Build a classifier from explicit code sets.
    #[must_use]
    pub fn new(
        fast_fail: impl IntoIterator<Item = impl Into<String>>,
        unretryable: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            fast_fail: fast_fail.into_iter().map(Into::into).collect(),
            unretryable: unretryable.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for CodeRegistryClassifier {
    fn default() -> Self {
        Self::new(
            ["GC_SNAPSHOT_LOST", "START_TS_BEFORE_GC"],
            ["INVALID_SINK_URI", "SINK_AUTH_FAILED", "SCHEMA_INCOMPATIBLE"],
        )
    }
}

impl ErrorClassifier for CodeRegistryClassifier {
    fn is_fast_fail(&self, code: &str) -> bool {
        self.fast_fail.contains(code)
    }

    fn is_unretryable(&self, code: &str) -> bool {
        self.unretryable.contains(code)
    }
}
