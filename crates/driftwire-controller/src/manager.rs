//! Feed state manager: the per-changefeed decision engine.
//!
//! One tick reconciles admin commands, processor fault reports, and the
//! persisted feed state into patch intents plus the derived should-run /
//! should-remove flags. All mutation flows through the reactor state's
//! patch journal; the manager itself holds only counters, the admin
//! queue, and the state window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use driftwire_state::ChangefeedReactorState;
use driftwire_types::{
    AdminJob, AdminJobKind, AdminJobType, CaptureId, ChangefeedId, ChangefeedStatus,
    ErrorClassifier, FeedState, RunningError,
};

use crate::backoff::{BackoffConfig, ErrorBackoff};
use crate::epoch::{TsOracle, generate_epoch};
use crate::queue::AdminJobQueue;
use crate::window::StateWindow;

/// Number of past feed-state samples inspected for the stability check.
/// If every sample in the window is normal and an error then arrives, the
/// feed degraded suddenly from a steady run and the backoff restarts from
/// the initial interval.
const STATE_WINDOW_SIZE: usize = 512;

/// Decides, on every tick, whether one changefeed should currently be
/// running, paused, terminally failed, or removed.
///
/// The outer reconciliation loop calls [`tick`](Self::tick) serially;
/// [`push_admin_job`](Self::push_admin_job) may be called from any thread.
pub struct FeedStateManager<O> {
    oracle: Arc<O>,
    classifier: Arc<dyn ErrorClassifier>,
    should_running: bool,
    should_removed: bool,
    admin_jobs: AdminJobQueue,
    window: StateWindow,
    /// Time of the last processor-reported error; `None` means no fault is
    /// pending a restart decision.
    last_error_time: Option<Instant>,
    /// Delay the feed must stay down after `last_error_time` before the
    /// next restart attempt.
    backoff_interval: Duration,
    backoff: ErrorBackoff,
    /// Identity captured on the first tick; `mark_finished` addresses the
    /// internal finish job with it.
    ticked_id: Option<ChangefeedId>,
}

impl<O: TsOracle> FeedStateManager<O> {
    /// A manager with the production backoff tuning.
    #[must_use]
    pub fn new(oracle: Arc<O>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self::with_backoff(oracle, classifier, BackoffConfig::default())
    }

    /// A manager with explicit backoff tuning.
    #[must_use]
    pub fn with_backoff(
        oracle: Arc<O>,
        classifier: Arc<dyn ErrorClassifier>,
        config: BackoffConfig,
    ) -> Self {
        let now = Instant::now();
        let mut backoff = ErrorBackoff::new(config);
        backoff.reset(now);
        let initial = backoff.initial_interval();
        let backoff_interval = backoff.next_backoff(now).unwrap_or(initial);
        Self {
            oracle,
            classifier,
            should_running: false,
            should_removed: false,
            admin_jobs: AdminJobQueue::default(),
            window: StateWindow::new(STATE_WINDOW_SIZE),
            last_error_time: None,
            backoff_interval,
            backoff,
            ticked_id: None,
        }
    }

    /// Run one decision round. Returns `true` iff an admin job was
    /// consumed this tick; re-evaluation of everything else then waits for
    /// the next tick, after persistence converges.
    ///
    /// `cancel` flows into the epoch oracle call only; the tick itself
    /// always completes its decision round so the emitted patches stay
    /// consistent.
    pub async fn tick(
        &mut self,
        state: &mut ChangefeedReactorState,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(current) = state.info.as_ref().map(|info| info.state) else {
            // Mid-removal: the info record is gone and there is nothing
            // left to decide for this feed.
            return false;
        };
        self.ticked_id = Some(state.id.clone());
        self.should_running = true;

        let job_consumed = self.run_decision_round(state, current, cancel).await;

        if self.should_running {
            self.patch_state(state, FeedState::Normal, cancel).await;
        } else {
            Self::clean_up_task_positions(state);
        }
        job_consumed
    }

    /// Current desired-run flag.
    #[must_use]
    pub fn should_running(&self) -> bool {
        self.should_running
    }

    /// Current removal flag.
    #[must_use]
    pub fn should_removed(&self) -> bool {
        self.should_removed
    }

    /// Enqueue an operator command for this changefeed.
    ///
    /// # Panics
    ///
    /// Panics if the job kind is [`AdminJobKind::Finish`]; finish jobs are
    /// internal-only and produced by [`mark_finished`](Self::mark_finished).
    pub fn push_admin_job(&self, job: AdminJob) {
        assert!(
            !matches!(job.kind, AdminJobKind::Finish),
            "finish jobs are internal; callers signal completion via mark_finished"
        );
        self.admin_jobs.push(job);
    }

    /// Request finalization of the feed on the next tick. A no-op until
    /// the first tick has bound the manager to a changefeed.
    pub fn mark_finished(&self) {
        let Some(id) = self.ticked_id.clone() else {
            return;
        };
        self.admin_jobs
            .push(AdminJob::new(id, AdminJobKind::Finish));
    }

    async fn run_decision_round(
        &mut self,
        state: &mut ChangefeedReactorState,
        current: FeedState,
        cancel: &CancellationToken,
    ) -> bool {
        if self.handle_admin_job(state, cancel).await {
            return true;
        }

        match current {
            FeedState::Removed => {
                self.should_running = false;
                self.should_removed = true;
                return false;
            }
            FeedState::Stopped | FeedState::Failed | FeedState::Finished => {
                self.should_running = false;
                return false;
            }
            FeedState::Error => {
                let unretryable = state
                    .info
                    .as_ref()
                    .and_then(|info| info.error.as_ref())
                    .is_some_and(|err| self.classifier.is_unretryable(&err.code));
                if unretryable {
                    self.should_running = false;
                    self.patch_state(state, FeedState::Failed, cancel).await;
                    return false;
                }
            }
            FeedState::Normal | FeedState::Warning => {}
        }

        let errors = Self::collect_reported_errors(state);
        self.handle_errors(state, errors, cancel).await;
        let warnings = Self::collect_reported_warnings(state);
        Self::handle_warnings(state, &warnings);
        false
    }

    // -----------------------------------------------------------------------
    // Admin jobs
    // -----------------------------------------------------------------------

    /// Dequeue and handle at most one admin job. Returns `true` only when
    /// a job was accepted; rejected and mismatched jobs are consumed
    /// without any state change and the tick proceeds normally.
    async fn handle_admin_job(
        &mut self,
        state: &mut ChangefeedReactorState,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(job) = self.admin_jobs.pop() else {
            return false;
        };
        if job.id != state.id {
            // The queue is per-manager but patches address records by id;
            // a job for another feed is dropped rather than misapplied.
            return false;
        }
        let current = state.info.as_ref().map(|info| info.state);
        tracing::info!(
            namespace = state.id.namespace,
            changefeed = state.id.id,
            kind = job.kind.as_str(),
            "handling admin job"
        );
        match job.kind {
            AdminJobKind::Stop => {
                if !matches!(current, Some(FeedState::Normal | FeedState::Error)) {
                    Self::warn_rejected(state, &job, current);
                    return false;
                }
                self.should_running = false;
                self.patch_state(state, FeedState::Stopped, cancel).await;
                true
            }
            AdminJobKind::Remove => {
                if !matches!(
                    current,
                    Some(
                        FeedState::Normal
                            | FeedState::Error
                            | FeedState::Failed
                            | FeedState::Stopped
                            | FeedState::Finished
                            | FeedState::Removed
                    )
                ) {
                    Self::warn_rejected(state, &job, current);
                    return false;
                }
                self.should_running = false;
                self.should_removed = true;
                state.patch_info(|_| Ok((None, true)));
                state.patch_status(|_| Ok((None, true)));
                let checkpoint_ts = state
                    .info
                    .as_ref()
                    .map_or(0, |info| info.checkpoint_ts(state.status.as_ref()));
                tracing::info!(
                    namespace = state.id.namespace,
                    changefeed = state.id.id,
                    checkpoint_ts,
                    "changefeed removed"
                );
                true
            }
            AdminJobKind::Resume => {
                if !matches!(
                    current,
                    Some(
                        FeedState::Failed
                            | FeedState::Error
                            | FeedState::Stopped
                            | FeedState::Finished
                    )
                ) {
                    Self::warn_rejected(state, &job, current);
                    return false;
                }
                self.should_running = true;
                // A manual resume always starts a fresh schedule.
                self.reset_backoff(Instant::now());
                self.last_error_time = None;
                self.patch_state(state, FeedState::Normal, cancel).await;

                let overwrite = job.overwrite_checkpoint_ts;
                state.patch_info(move |info| {
                    let Some(mut info) = info else {
                        return Ok((None, false));
                    };
                    let mut changed = false;
                    if overwrite > 0 {
                        info.start_ts = overwrite;
                        changed = true;
                    }
                    if info.error.is_some() {
                        info.error = None;
                        changed = true;
                    }
                    Ok((Some(info), changed))
                });
                if overwrite > 0 {
                    tracing::info!(
                        namespace = state.id.namespace,
                        changefeed = state.id.id,
                        old_checkpoint_ts = state.status.as_ref().map(|s| s.checkpoint_ts),
                        new_checkpoint_ts = overwrite,
                        "rewinding changefeed checkpoint on resume"
                    );
                }
                state.patch_status(move |status| {
                    if overwrite > 0 {
                        Ok((Some(ChangefeedStatus::at(overwrite)), true))
                    } else {
                        Ok((status, false))
                    }
                });
                true
            }
            AdminJobKind::Finish => {
                if !matches!(current, Some(FeedState::Normal)) {
                    Self::warn_rejected(state, &job, current);
                    return false;
                }
                self.should_running = false;
                self.patch_state(state, FeedState::Finished, cancel).await;
                true
            }
        }
    }

    fn warn_rejected(state: &ChangefeedReactorState, job: &AdminJob, current: Option<FeedState>) {
        tracing::warn!(
            namespace = state.id.namespace,
            changefeed = state.id.id,
            kind = job.kind.as_str(),
            state = current.map(FeedState::as_str),
            "admin job is not permitted in the current state, dropping it"
        );
    }

    // -----------------------------------------------------------------------
    // Processor reports
    // -----------------------------------------------------------------------

    /// Drain errors reported on task positions, coalescing by error code
    /// (the same fault reported by several processors is absorbed once).
    fn collect_reported_errors(state: &mut ChangefeedReactorState) -> Vec<RunningError> {
        let mut by_code: HashMap<String, RunningError> = HashMap::new();
        let reporting: Vec<CaptureId> = state
            .task_positions
            .iter()
            .filter(|(_, position)| position.error.is_some())
            .map(|(capture, _)| capture.clone())
            .collect();
        for capture in reporting {
            let Some(error) = state
                .task_positions
                .get(&capture)
                .and_then(|position| position.error.clone())
            else {
                continue;
            };
            tracing::error!(
                namespace = state.id.namespace,
                changefeed = state.id.id,
                capture = capture.as_str(),
                code = error.code,
                message = error.message,
                "processor reported an error"
            );
            by_code.insert(error.code.clone(), error);
            state.patch_task_position(capture, |position| {
                let Some(mut position) = position else {
                    return Ok((None, false));
                };
                position.error = None;
                Ok((Some(position), true))
            });
        }
        by_code.into_values().collect()
    }

    /// Warning twin of [`collect_reported_errors`](Self::collect_reported_errors).
    fn collect_reported_warnings(state: &mut ChangefeedReactorState) -> Vec<RunningError> {
        let mut by_code: HashMap<String, RunningError> = HashMap::new();
        let reporting: Vec<CaptureId> = state
            .task_positions
            .iter()
            .filter(|(_, position)| position.warning.is_some())
            .map(|(capture, _)| capture.clone())
            .collect();
        for capture in reporting {
            let Some(warning) = state
                .task_positions
                .get(&capture)
                .and_then(|position| position.warning.clone())
            else {
                continue;
            };
            tracing::warn!(
                namespace = state.id.namespace,
                changefeed = state.id.id,
                capture = capture.as_str(),
                code = warning.code,
                message = warning.message,
                "processor reported a warning"
            );
            by_code.insert(warning.code.clone(), warning);
            state.patch_task_position(capture, |position| {
                let Some(mut position) = position else {
                    return Ok((None, false));
                };
                position.warning = None;
                Ok((Some(position), true))
            });
        }
        by_code.into_values().collect()
    }

    // -----------------------------------------------------------------------
    // Fault handling
    // -----------------------------------------------------------------------

    async fn handle_errors(
        &mut self,
        state: &mut ChangefeedReactorState,
        errors: Vec<RunningError>,
        cancel: &CancellationToken,
    ) {
        // A fast-fail error terminates the feed immediately; nothing else
        // in the batch is worth recording.
        if let Some(error) = errors
            .iter()
            .find(|err| self.classifier.is_fast_fail(&err.code))
        {
            let error = error.clone();
            state.patch_info(move |info| {
                let Some(mut info) = info else {
                    return Ok((None, false));
                };
                info.error = Some(error);
                Ok((Some(info), true))
            });
            self.should_running = false;
            self.patch_state(state, FeedState::Failed, cancel).await;
            return;
        }

        let current = state.info.as_ref().map(|info| info.state);

        // A stopped feed must not be resurrected by late reports; only the
        // stopped-to-failed transition is ever allowed out of it.
        if current == Some(FeedState::Stopped) {
            tracing::warn!(
                namespace = state.id.namespace,
                changefeed = state.id.id,
                error_count = errors.len(),
                "changefeed is stopped, ignoring reported errors"
            );
            return;
        }

        if let Some(error) = errors
            .iter()
            .find(|err| self.classifier.is_unretryable(&err.code))
        {
            let error = error.clone();
            state.patch_info(move |info| {
                let Some(mut info) = info else {
                    return Ok((None, false));
                };
                info.error = Some(error);
                Ok((Some(info), true))
            });
            self.should_running = false;
            self.patch_state(state, FeedState::Error, cancel).await;
            return;
        }

        if let Some(last) = errors.last().cloned() {
            state.patch_info(move |info| {
                let Some(mut info) = info else {
                    return Ok((None, false));
                };
                info.error = Some(last);
                Ok((Some(info), true))
            });
        }

        let now = Instant::now();
        if errors.is_empty() {
            if current == Some(FeedState::Normal) {
                self.last_error_time = None;
            }
        } else {
            self.last_error_time = Some(now);
            if self.window.is_stable() {
                // The feed was healthy for the whole window and just
                // broke: restart the schedule from the initial delay.
                self.reset_backoff(now);
            }
        }
        if let Some(sample) = current {
            self.window.push(sample);
        }

        let Some(last_error_time) = self.last_error_time else {
            return;
        };

        if now.duration_since(last_error_time) < self.backoff_interval {
            self.should_running = false;
            self.patch_state(state, FeedState::Error, cancel).await;
        } else {
            let old_interval = self.backoff_interval;
            let next = self.backoff.next_backoff(now);
            self.last_error_time = None;
            match next {
                Some(interval) => {
                    self.backoff_interval = interval;
                    tracing::info!(
                        namespace = state.id.namespace,
                        changefeed = state.id.id,
                        old_interval_ms = u64::try_from(old_interval.as_millis()).unwrap_or(u64::MAX),
                        new_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                        "changefeed restart backoff interval changed"
                    );
                }
                None => {
                    tracing::warn!(
                        namespace = state.id.namespace,
                        changefeed = state.id.id,
                        "changefeed kept failing past the backoff budget and will not be restarted"
                    );
                    self.should_running = false;
                    self.patch_state(state, FeedState::Failed, cancel).await;
                }
            }
        }
    }

    /// Warnings only surface on the info record; they never affect the
    /// run decision, the backoff, or the state window.
    fn handle_warnings(state: &mut ChangefeedReactorState, warnings: &[RunningError]) {
        if let Some(last) = warnings.last().cloned() {
            state.patch_info(move |info| {
                let Some(mut info) = info else {
                    return Ok((None, false));
                };
                info.warning = Some(last);
                Ok((Some(info), true))
            });
        }
    }

    // -----------------------------------------------------------------------
    // State patching
    // -----------------------------------------------------------------------

    /// Map the target state to its admin-job-type mirror and emit the pair
    /// of patch closures. The epoch is fetched before closure construction
    /// when this transition warrants one, so the closures stay pure.
    async fn patch_state(
        &mut self,
        state: &mut ChangefeedReactorState,
        target: FeedState,
        cancel: &CancellationToken,
    ) {
        let (admin_job_type, update_epoch) = match target {
            FeedState::Normal => (AdminJobType::None, false),
            FeedState::Finished => (AdminJobType::Finish, true),
            FeedState::Error | FeedState::Stopped | FeedState::Failed => {
                (AdminJobType::Stop, true)
            }
            FeedState::Removed => (AdminJobType::Remove, true),
            FeedState::Warning => {
                debug_assert!(false, "warning is never a patch target");
                tracing::error!(
                    namespace = state.id.namespace,
                    changefeed = state.id.id,
                    "ignoring request to patch the feed state to warning"
                );
                return;
            }
        };

        state.patch_status(move |status| {
            let Some(mut status) = status else {
                return Ok((None, false));
            };
            if status.admin_job_type == admin_job_type {
                return Ok((Some(status), false));
            }
            status.admin_job_type = admin_job_type;
            Ok((Some(status), true))
        });

        let transitioning = state
            .info
            .as_ref()
            .is_some_and(|info| info.admin_job_type != admin_job_type);
        let epoch = if update_epoch && transitioning {
            let previous = state.info.as_ref().map_or(0, |info| info.epoch);
            let epoch = generate_epoch(self.oracle.as_ref(), cancel).await;
            tracing::info!(
                namespace = state.id.namespace,
                changefeed = state.id.id,
                previous_epoch = previous,
                current_epoch = epoch,
                "updating changefeed epoch"
            );
            Some(epoch)
        } else {
            None
        };

        state.patch_info(move |info| {
            let Some(mut info) = info else {
                return Ok((None, false));
            };
            let mut changed = false;
            if info.state != target {
                info.state = target;
                changed = true;
            }
            if info.admin_job_type != admin_job_type {
                info.admin_job_type = admin_job_type;
                changed = true;
                if let Some(epoch) = epoch {
                    info.epoch = epoch;
                }
            }
            Ok((Some(info), changed))
        });
    }

    /// Clear every present task position so processors deallocate on their
    /// next reconcile. Absent positions are not patched.
    fn clean_up_task_positions(state: &mut ChangefeedReactorState) {
        let captures: Vec<CaptureId> = state.task_positions.keys().cloned().collect();
        for capture in captures {
            state.patch_task_position(capture, |position| Ok((None, position.is_some())));
        }
    }

    fn reset_backoff(&mut self, now: Instant) {
        self.backoff.reset(now);
        let initial = self.backoff.initial_interval();
        self.backoff_interval = self.backoff.next_backoff(now).unwrap_or(initial);
    }
}
