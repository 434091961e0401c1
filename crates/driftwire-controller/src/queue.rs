//! FIFO queue of operator commands addressed to one changefeed.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use driftwire_types::AdminJob;

/// Thread-safe FIFO of admin jobs.
///
/// Pushes may arrive from any thread; pops happen on the tick thread.
/// Jobs pushed by one caller before a tick boundary are consumed in push
/// order; jobs arriving during a tick are visible no earlier than the
/// next tick.
#[derive(Debug, Default)]
pub struct AdminJobQueue {
    jobs: Mutex<VecDeque<AdminJob>>,
}

impl AdminJobQueue {
    pub fn push(&self, job: AdminJob) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }

    pub fn pop(&self) -> Option<AdminJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}
