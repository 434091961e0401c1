//! End-to-end decision scenarios for the feed state manager, driven over
//! a local reactor state with a mock oracle and the paused tokio clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use driftwire_controller::{FeedStateManager, TsOracle};
use driftwire_state::ChangefeedReactorState;
use driftwire_types::{
    AdminJob, AdminJobKind, AdminJobType, CaptureId, ChangefeedId, ChangefeedInfo,
    ChangefeedStatus, CodeRegistryClassifier, FeedState, RunningError, TaskPosition,
};

/// Oracle that counts calls and hands out increasing physical timestamps.
struct CountingOracle {
    physical_ms: AtomicI64,
    calls: AtomicUsize,
}

impl CountingOracle {
    fn new() -> Self {
        Self {
            physical_ms: AtomicI64::new(1),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TsOracle for CountingOracle {
    async fn get_ts(&self) -> anyhow::Result<(i64, i64)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.physical_ms.fetch_add(1, Ordering::SeqCst), 0))
    }
}

struct Harness {
    manager: FeedStateManager<CountingOracle>,
    oracle: Arc<CountingOracle>,
    state: ChangefeedReactorState,
    cancel: CancellationToken,
}

impl Harness {
    fn with_info(info: ChangefeedInfo) -> Self {
        let oracle = Arc::new(CountingOracle::new());
        let manager = FeedStateManager::new(
            oracle.clone(),
            Arc::new(CodeRegistryClassifier::default()),
        );
        let state = ChangefeedReactorState::new(
            changefeed_id(),
            Some(info),
            Some(ChangefeedStatus::at(100)),
        );
        Self {
            manager,
            oracle,
            state,
            cancel: CancellationToken::new(),
        }
    }

    fn healthy() -> Self {
        Self::with_info(ChangefeedInfo::new(100))
    }

    /// One tick followed by local patch application. Returns the consumed
    /// flag and the number of patches that actually changed a record.
    async fn tick(&mut self) -> (bool, u64) {
        let consumed = self.manager.tick(&mut self.state, &self.cancel).await;
        let changed = self.state.apply_pending().unwrap();
        (consumed, changed)
    }

    fn report_error(&mut self, capture: &str, code: &str) {
        self.state.task_positions.insert(
            CaptureId::new(capture),
            TaskPosition {
                error: Some(RunningError::new(capture, code, "boom")),
                ..TaskPosition::default()
            },
        );
    }

    fn report_warning(&mut self, capture: &str, code: &str) {
        self.state.task_positions.insert(
            CaptureId::new(capture),
            TaskPosition {
                warning: Some(RunningError::new(capture, code, "degraded")),
                ..TaskPosition::default()
            },
        );
    }

    fn feed_state(&self) -> FeedState {
        self.state.info.as_ref().unwrap().state
    }

    fn info(&self) -> &ChangefeedInfo {
        self.state.info.as_ref().unwrap()
    }
}

fn changefeed_id() -> ChangefeedId {
    ChangefeedId::new("default", "orders")
}

fn failed_info() -> ChangefeedInfo {
    let mut info = ChangefeedInfo::new(100);
    info.state = FeedState::Failed;
    info.admin_job_type = AdminJobType::Stop;
    info.error = Some(RunningError::new("capture-1", "SINK_AUTH_FAILED", "denied"));
    info
}

// ---------------------------------------------------------------------------
// Happy path and idempotence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn happy_path_keeps_a_normal_feed_running() {
    let mut h = Harness::healthy();
    let (consumed, changed) = h.tick().await;
    assert!(!consumed);
    assert_eq!(changed, 0);
    assert!(h.manager.should_running());
    assert!(!h.manager.should_removed());
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert_eq!(h.oracle.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_empty_ticks_are_idempotent() {
    let mut h = Harness::healthy();
    let (_, first) = h.tick().await;
    let (_, second) = h.tick().await;
    assert_eq!(first, 0);
    assert_eq!(second, 0);
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert_eq!(h.state.status.unwrap(), ChangefeedStatus::at(100));
}

// ---------------------------------------------------------------------------
// Admin jobs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn an_accepted_admin_job_preempts_fault_handling() {
    let mut h = Harness::healthy();
    h.report_error("capture-1", "CONN_RESET");
    h.manager
        .push_admin_job(AdminJob::new(changefeed_id(), AdminJobKind::Stop));

    let (consumed, _) = h.tick().await;
    assert!(consumed);
    assert_eq!(h.feed_state(), FeedState::Stopped);
    assert_eq!(h.info().admin_job_type, AdminJobType::Stop);
    // The reported error was never absorbed; its position is simply gone.
    assert!(h.info().error.is_none());
    assert!(h.state.task_positions.is_empty());
    assert!(!h.manager.should_running());
}

#[tokio::test(start_paused = true)]
async fn a_job_for_another_changefeed_is_dropped() {
    let mut h = Harness::healthy();
    h.manager.push_admin_job(AdminJob::new(
        ChangefeedId::new("default", "somebody-else"),
        AdminJobKind::Stop,
    ));
    let (consumed, _) = h.tick().await;
    assert!(!consumed);
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert!(h.manager.should_running());
}

#[tokio::test(start_paused = true)]
async fn stop_is_rejected_for_a_failed_feed() {
    let mut h = Harness::with_info(failed_info());
    h.manager
        .push_admin_job(AdminJob::new(changefeed_id(), AdminJobKind::Stop));
    let (consumed, _) = h.tick().await;
    assert!(!consumed);
    assert_eq!(h.feed_state(), FeedState::Failed);
    assert!(!h.manager.should_running());
}

#[tokio::test(start_paused = true)]
async fn resume_with_an_overwrite_rewinds_the_feed() {
    let mut h = Harness::with_info(failed_info());
    h.manager.push_admin_job(AdminJob {
        id: changefeed_id(),
        kind: AdminJobKind::Resume,
        overwrite_checkpoint_ts: 42,
    });

    let (consumed, _) = h.tick().await;
    assert!(consumed);
    assert!(h.manager.should_running());
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert_eq!(h.info().admin_job_type, AdminJobType::None);
    assert!(h.info().error.is_none());
    assert_eq!(h.info().start_ts, 42);
    assert_eq!(h.state.status.unwrap(), ChangefeedStatus::at(42));
    // Transitions into normal never touch the epoch.
    assert_eq!(h.oracle.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn resume_without_an_overwrite_keeps_the_status() {
    let mut info = ChangefeedInfo::new(100);
    info.state = FeedState::Stopped;
    info.admin_job_type = AdminJobType::Stop;
    info.error = Some(RunningError::new("capture-1", "CONN_RESET", "boom"));
    let mut h = Harness::with_info(info);
    h.manager
        .push_admin_job(AdminJob::new(changefeed_id(), AdminJobKind::Resume));

    let (consumed, _) = h.tick().await;
    assert!(consumed);
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert!(h.info().error.is_none());
    assert_eq!(h.info().start_ts, 100);
    assert_eq!(h.state.status.unwrap(), ChangefeedStatus::at(100));
}

#[tokio::test(start_paused = true)]
async fn resume_resets_the_restart_schedule() {
    let mut h = Harness::with_info(failed_info());
    h.manager
        .push_admin_job(AdminJob::new(changefeed_id(), AdminJobKind::Resume));
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Normal);

    // The first fault after a resume is only held back by the initial
    // delay, proving the schedule restarted.
    h.report_error("capture-1", "CONN_RESET");
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Error);
    tokio::time::advance(Duration::from_secs(12)).await;
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert!(h.manager.should_running());
}

#[tokio::test(start_paused = true)]
async fn remove_erases_both_records_from_any_state() {
    let mut info = ChangefeedInfo::new(100);
    info.state = FeedState::Error;
    info.admin_job_type = AdminJobType::Stop;
    let mut h = Harness::with_info(info);
    h.report_error("capture-1", "CONN_RESET");
    h.manager
        .push_admin_job(AdminJob::new(changefeed_id(), AdminJobKind::Remove));

    let (consumed, _) = h.tick().await;
    assert!(consumed);
    assert!(!h.manager.should_running());
    assert!(h.manager.should_removed());
    assert!(h.state.info.is_none());
    assert!(h.state.status.is_none());
    assert!(h.state.task_positions.is_empty());

    // Once the records are gone, further ticks have nothing to decide.
    let (consumed, changed) = h.tick().await;
    assert!(!consumed);
    assert_eq!(changed, 0);
}

#[tokio::test(start_paused = true)]
async fn mark_finished_finalizes_a_normal_feed() {
    let mut h = Harness::healthy();
    h.tick().await;
    h.manager.mark_finished();

    let (consumed, _) = h.tick().await;
    assert!(consumed);
    assert_eq!(h.feed_state(), FeedState::Finished);
    assert_eq!(h.info().admin_job_type, AdminJobType::Finish);
    assert!(!h.manager.should_running());
    assert_eq!(h.oracle.calls(), 1);
    assert!(h.info().epoch > 0);
}

// ---------------------------------------------------------------------------
// Fault handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn a_fast_fail_error_terminates_the_feed_immediately() {
    let mut h = Harness::healthy();
    h.report_error("capture-1", "GC_SNAPSHOT_LOST");
    h.report_error("capture-2", "CONN_RESET");

    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Failed);
    assert_eq!(h.info().error.as_ref().unwrap().code, "GC_SNAPSHOT_LOST");
    assert_eq!(h.info().admin_job_type, AdminJobType::Stop);
    assert!(h.state.task_positions.is_empty());
    assert!(!h.manager.should_running());
    assert_eq!(h.oracle.calls(), 1);
    assert!(h.info().epoch > 0);
}

#[tokio::test(start_paused = true)]
async fn an_unretryable_error_passes_through_an_observable_error_state() {
    let mut h = Harness::healthy();
    h.report_error("capture-1", "INVALID_SINK_URI");

    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Error);
    assert_eq!(h.info().error.as_ref().unwrap().code, "INVALID_SINK_URI");
    assert!(!h.manager.should_running());

    // The following tick promotes the recorded error to terminal.
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Failed);
    assert!(!h.manager.should_running());
}

#[tokio::test(start_paused = true)]
async fn a_stopped_feed_stays_stopped_under_late_errors() {
    let mut info = ChangefeedInfo::new(100);
    info.state = FeedState::Stopped;
    info.admin_job_type = AdminJobType::Stop;
    let mut h = Harness::with_info(info);
    h.report_error("capture-1", "CONN_RESET");

    let (consumed, _) = h.tick().await;
    assert!(!consumed);
    assert_eq!(h.feed_state(), FeedState::Stopped);
    assert!(h.info().error.is_none());
    assert!(h.state.task_positions.is_empty());
    assert!(!h.manager.should_running());
}

#[tokio::test(start_paused = true)]
async fn a_retryable_error_restarts_after_the_backoff_delay() {
    let mut h = Harness::healthy();
    h.tick().await;

    h.report_error("capture-1", "CONN_RESET");
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Error);
    assert_eq!(h.info().error.as_ref().unwrap().code, "CONN_RESET");
    assert!(!h.manager.should_running());
    assert!(h.state.task_positions.is_empty());

    // Still inside the backoff delay: the feed stays down, and the epoch
    // is not stamped again for the same transition.
    let calls_after_fault = h.oracle.calls();
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Error);
    assert_eq!(h.oracle.calls(), calls_after_fault);

    tokio::time::advance(Duration::from_secs(12)).await;
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert!(h.manager.should_running());
    // The recorded error is only ever cleared by an operator resume.
    assert!(h.info().error.is_some());
}

#[tokio::test(start_paused = true)]
async fn continuous_faults_exhaust_the_backoff_budget() {
    let mut h = Harness::healthy();
    h.tick().await;

    let mut ticks = 0;
    while h.feed_state() != FeedState::Failed {
        ticks += 1;
        assert!(ticks < 100, "feed never went terminal");
        if h.manager.should_running() {
            h.report_error("capture-1", "CONN_RESET");
        }
        h.tick().await;
        tokio::time::advance(Duration::from_secs(600)).await;
    }
    assert!(!h.manager.should_running());
    assert_eq!(h.info().admin_job_type, AdminJobType::Stop);
}

#[tokio::test(start_paused = true)]
async fn a_stable_window_resets_the_backoff_schedule() {
    let mut h = Harness::healthy();
    h.tick().await;

    // Two fault cycles grow the restart delay well past the initial one.
    h.report_error("capture-1", "CONN_RESET");
    h.tick().await;
    tokio::time::advance(Duration::from_secs(12)).await;
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Normal);
    h.report_error("capture-1", "CONN_RESET");
    h.tick().await;
    tokio::time::advance(Duration::from_secs(25)).await;
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Normal);

    // A full window of healthy ticks marks the feed stable again.
    for _ in 0..512 {
        h.tick().await;
    }

    // Sudden degradation from a stable run: the schedule restarts from
    // the initial delay instead of the grown one.
    h.report_error("capture-1", "CONN_RESET");
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Error);
    tokio::time::advance(Duration::from_secs(12)).await;
    h.tick().await;
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert!(h.manager.should_running());
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn warnings_surface_without_affecting_the_run_decision() {
    let mut h = Harness::healthy();
    h.report_warning("capture-1", "SINK_SLOW");

    let (consumed, _) = h.tick().await;
    assert!(!consumed);
    assert_eq!(h.feed_state(), FeedState::Normal);
    assert!(h.manager.should_running());
    assert_eq!(h.info().warning.as_ref().unwrap().code, "SINK_SLOW");
    assert_eq!(h.oracle.calls(), 0);

    // The warning was absorbed off the position, which itself survives.
    let position = h
        .state
        .task_positions
        .get(&CaptureId::new("capture-1"))
        .unwrap();
    assert!(position.warning.is_none());
}
