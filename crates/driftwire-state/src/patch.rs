//! Patch intents: pure mutation closures addressed at persisted records.

use std::fmt;

use driftwire_types::{CaptureId, ChangefeedInfo, ChangefeedStatus, TaskPosition};

/// A pure mutation over the latest stored value of `T`.
///
/// Receives the latest value (`None` when the record does not exist) and
/// returns the new value plus a changed flag. When the flag is `false` the
/// store is left untouched, which is what makes repeated identical ticks
/// idempotent. The closure must not read anything except its argument.
pub type PatchFn<T> = Box<dyn FnOnce(Option<T>) -> anyhow::Result<(Option<T>, bool)> + Send>;

/// One journal entry, naming the record the closure applies to.
pub enum DataPatch {
    Info(PatchFn<ChangefeedInfo>),
    Status(PatchFn<ChangefeedStatus>),
    TaskPosition {
        capture: CaptureId,
        patch: PatchFn<TaskPosition>,
    },
}

impl fmt::Debug for DataPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(_) => f.write_str("DataPatch::Info"),
            Self::Status(_) => f.write_str("DataPatch::Status"),
            Self::TaskPosition { capture, .. } => {
                write!(f, "DataPatch::TaskPosition({capture})")
            }
        }
    }
}
