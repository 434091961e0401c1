//! The per-changefeed reactor state: latest records plus patch journal.

use std::collections::HashMap;

use driftwire_types::{CaptureId, ChangefeedId, ChangefeedInfo, ChangefeedStatus, TaskPosition};

use crate::error::{Result, StateError};
use crate::patch::DataPatch;

/// Latest observed persisted state of one changefeed, plus the journal of
/// patch intents accumulated during the current reconciliation round.
///
/// The record fields are public because collaborators other than the
/// controller (the capture tracker, the barrier calculator) read them
/// directly; mutation goes through the `patch_*` methods only.
#[derive(Debug)]
pub struct ChangefeedReactorState {
    pub id: ChangefeedId,
    pub info: Option<ChangefeedInfo>,
    pub status: Option<ChangefeedStatus>,
    pub task_positions: HashMap<CaptureId, TaskPosition>,
    pending: Vec<DataPatch>,
}

impl ChangefeedReactorState {
    /// A reactor state seeded with the given records.
    #[must_use]
    pub fn new(
        id: ChangefeedId,
        info: Option<ChangefeedInfo>,
        status: Option<ChangefeedStatus>,
    ) -> Self {
        Self {
            id,
            info,
            status,
            task_positions: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Enqueue a patch against the changefeed info record.
    pub fn patch_info<F>(&mut self, patch: F)
    where
        F: FnOnce(Option<ChangefeedInfo>) -> anyhow::Result<(Option<ChangefeedInfo>, bool)>
            + Send
            + 'static,
    {
        self.pending.push(DataPatch::Info(Box::new(patch)));
    }

    /// Enqueue a patch against the changefeed status record.
    pub fn patch_status<F>(&mut self, patch: F)
    where
        F: FnOnce(Option<ChangefeedStatus>) -> anyhow::Result<(Option<ChangefeedStatus>, bool)>
            + Send
            + 'static,
    {
        self.pending.push(DataPatch::Status(Box::new(patch)));
    }

    /// Enqueue a patch against one processor's task position.
    pub fn patch_task_position<F>(&mut self, capture: CaptureId, patch: F)
    where
        F: FnOnce(Option<TaskPosition>) -> anyhow::Result<(Option<TaskPosition>, bool)>
            + Send
            + 'static,
    {
        self.pending.push(DataPatch::TaskPosition {
            capture,
            patch: Box::new(patch),
        });
    }

    /// Number of journal entries not yet drained.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain the journal for the persistence collaborator to apply against
    /// durable storage.
    #[must_use]
    pub fn take_patches(&mut self) -> Vec<DataPatch> {
        std::mem::take(&mut self.pending)
    }

    /// Apply the journal against the in-memory records, in order.
    ///
    /// Returns the number of patches whose changed flag was set. Used by
    /// embedders that keep state locally and by tests; production drains
    /// with [`take_patches`](Self::take_patches) instead.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::PatchFailed`] on the first failing closure;
    /// later entries in the batch are discarded.
    pub fn apply_pending(&mut self) -> Result<u64> {
        let mut changed_count = 0;
        for patch in std::mem::take(&mut self.pending) {
            match patch {
                DataPatch::Info(f) => {
                    let (new, changed) = f(self.info.clone()).map_err(StateError::PatchFailed)?;
                    if changed {
                        self.info = new;
                        changed_count += 1;
                    }
                }
                DataPatch::Status(f) => {
                    let (new, changed) = f(self.status.clone()).map_err(StateError::PatchFailed)?;
                    if changed {
                        self.status = new;
                        changed_count += 1;
                    }
                }
                DataPatch::TaskPosition { capture, patch } => {
                    let current = self.task_positions.get(&capture).cloned();
                    let (new, changed) = patch(current).map_err(StateError::PatchFailed)?;
                    if changed {
                        match new {
                            Some(position) => {
                                self.task_positions.insert(capture, position);
                            }
                            None => {
                                self.task_positions.remove(&capture);
                            }
                        }
                        changed_count += 1;
                    }
                }
            }
        }
        Ok(changed_count)
    }
}
