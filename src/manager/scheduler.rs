// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication scheduler: the periodic timer driving rounds.
//!
//! At most one schedule is armed per manager. Each armed schedule runs one
//! loop task which:
//!
//! 1. Waits one period, then ticks every period
//! 2. Skips a tick while the device is offline
//! 3. Applies the [`OverlapPolicy`] when a round is still in flight
//! 4. Begins a round and watches it settle
//! 5. On success invokes `on_sync` and keeps ticking
//! 6. On failure disarms itself, then invokes `on_error` once
//!
//! Nothing restarts a failed schedule except the owner (or a lifecycle
//! `Resume`).

use super::types::SchedulerState;
use super::ManagerCore;
use crate::config::OverlapPolicy;
use crate::metrics;
use crate::round::{ReplicationRound, RoundOutcome};
use crate::store::LocalStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to an armed schedule.
///
/// Returned by `SyncManager::start`. Two handles are equal when they refer
/// to the same schedule, so repeated `start` calls can be compared.
#[derive(Clone)]
pub struct ScheduleHandle {
    id: u64,
    delay: Duration,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl ScheduleHandle {
    fn new(id: u64, delay: Duration) -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = Self {
            id,
            delay,
            stop_tx: Arc::new(stop_tx),
        };
        (handle, stop_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tick period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether the schedule has not been stopped.
    pub fn is_active(&self) -> bool {
        !*self.stop_tx.borrow()
    }

    /// Stop ticking. Idempotent.
    ///
    /// Only clears the timer; a round already in flight keeps running and
    /// still reaches `on_sync` or `on_error` when it settles. Use
    /// `SyncManager::stop` to cancel it as well.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl PartialEq for ScheduleHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduleHandle {}

impl std::fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Result of arming the scheduler.
pub(crate) enum Armed {
    /// A schedule was already active.
    Existing(ScheduleHandle),
    /// A new schedule; the caller spawns its loop.
    New(ScheduleHandle, watch::Receiver<bool>),
}

/// Owns the active schedule slot and publishes [`SchedulerState`].
pub struct ReplicationScheduler {
    active: Mutex<Option<ScheduleHandle>>,
    state_tx: watch::Sender<SchedulerState>,
    next_id: AtomicU64,
}

impl ReplicationScheduler {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Stopped);
        Self {
            active: Mutex::new(None),
            state_tx,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Receiver to watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Active schedule, if any.
    pub async fn handle(&self) -> Option<ScheduleHandle> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|h| h.is_active())
            .cloned()
    }

    pub(crate) async fn arm(&self, delay: Duration) -> Armed {
        let mut active = self.active.lock().await;
        if let Some(handle) = active.as_ref().filter(|h| h.is_active()) {
            return Armed::Existing(handle.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle, stop_rx) = ScheduleHandle::new(id, delay);
        *active = Some(handle.clone());
        drop(active);

        self.set_state(SchedulerState::Running);
        Armed::New(handle, stop_rx)
    }

    /// Stop whatever schedule is active. Returns it if there was one.
    pub(crate) async fn disarm(&self) -> Option<ScheduleHandle> {
        let handle = self.active.lock().await.take()?;
        handle.stop();
        self.set_state(SchedulerState::Stopped);
        Some(handle)
    }

    /// Stop the schedule only if it is still the one identified by `id`.
    pub(crate) async fn disarm_if(&self, id: u64) -> bool {
        let mut active = self.active.lock().await;
        match active.as_ref() {
            Some(handle) if handle.id == id => {
                handle.stop();
                *active = None;
                drop(active);
                self.set_state(SchedulerState::Stopped);
                true
            }
            _ => false,
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_replace(state);
        metrics::set_scheduler_running(state == SchedulerState::Running);
    }
}

impl Drop for ReplicationScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.active.get_mut().take() {
            handle.stop();
        }
    }
}

/// Run one armed schedule until it is stopped, fails, or the manager is gone.
pub(crate) async fn run_loop<S: LocalStore>(
    core: Weak<ManagerCore<S>>,
    handle: ScheduleHandle,
    mut stop_rx: watch::Receiver<bool>,
) {
    if *stop_rx.borrow_and_update() {
        return;
    }

    let delay = handle.delay();
    let mut timer = tokio::time::interval_at(Instant::now() + delay, delay);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Round started by this loop that has not been observed settling yet.
    let mut in_flight: Option<Arc<ReplicationRound>> = None;

    info!(delay_ms = delay.as_millis() as u64, "Replication loop started");

    loop {
        let watched = in_flight.clone();

        tokio::select! {
            biased;

            result = stop_rx.changed() => {
                if result.is_err() || *stop_rx.borrow() {
                    debug!("Stop signal received, leaving replication loop");
                    if let Some(core) = core.upgrade() {
                        core.scheduler.disarm_if(handle.id()).await;
                    }
                    // The timer is gone but a round already started still reports.
                    if let Some(round) = in_flight.take() {
                        let outcome = round.wait().await;
                        if let Some(core) = core.upgrade() {
                            report_outcome(&core, &handle, outcome).await;
                        }
                    }
                    break;
                }
            }

            outcome = settled(watched) => {
                in_flight = None;
                let Some(core) = core.upgrade() else { break };

                if report_outcome(&core, &handle, outcome).await {
                    return;
                }
            }

            _ = timer.tick() => {
                let Some(core) = core.upgrade() else { break };
                if core.is_destroyed() {
                    break;
                }

                if !core.platform.is_online() {
                    info!("The device is offline, replication skipped");
                    core.stats.tick_skipped_offline();
                    metrics::record_tick_skipped("offline");
                    continue;
                }

                if let Some(current) = core.current_round().await.filter(|r| !r.is_settled()) {
                    match core.config.overlap_policy {
                        OverlapPolicy::SkipIfBusy => {
                            debug!(round_id = current.id(), "Previous round still running, tick skipped");
                            core.stats.tick_skipped_busy();
                            metrics::record_tick_skipped("busy");
                            continue;
                        }
                        OverlapPolicy::CancelAndRestart => {
                            warn!(round_id = current.id(), "Previous round still running, cancelling it");
                            core.cancel_round(&current);
                        }
                    }
                }

                in_flight = Some(core.begin_round().await);
            }
        }
    }

    if let Some(core) = core.upgrade() {
        core.scheduler.disarm_if(handle.id()).await;
    }
    info!("Replication loop stopped");
}

/// Hand a settled scheduled round to the callbacks. Returns `true` when the
/// round failed and the schedule has been disarmed.
async fn report_outcome<S: LocalStore>(
    core: &ManagerCore<S>,
    handle: &ScheduleHandle,
    outcome: RoundOutcome,
) -> bool {
    match outcome {
        RoundOutcome::Synced(updates) => {
            core.report_success(&updates).await;
            false
        }
        RoundOutcome::Failed(err) => {
            core.scheduler.disarm_if(handle.id()).await;
            core.report_failure(&err).await;
            true
        }
        RoundOutcome::Cancelled => {
            debug!("Scheduled round was cancelled");
            false
        }
    }
}

async fn settled(round: Option<Arc<ReplicationRound>>) -> RoundOutcome {
    match round {
        Some(round) => round.wait().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_arm_is_idempotent() {
        let scheduler = ReplicationScheduler::new();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let first = match scheduler.arm(Duration::from_secs(5)).await {
            Armed::New(handle, _) => handle,
            Armed::Existing(_) => panic!("nothing was armed yet"),
        };
        assert_eq!(scheduler.state(), SchedulerState::Running);

        match scheduler.arm(Duration::from_secs(60)).await {
            Armed::Existing(handle) => {
                assert_eq!(handle, first);
                assert_eq!(handle.delay(), Duration::from_secs(5));
            }
            Armed::New(..) => panic!("schedule should already be armed"),
        }
    }

    #[tokio::test]
    async fn test_disarm_signals_stop() {
        let scheduler = ReplicationScheduler::new();
        let Armed::New(handle, stop_rx) = scheduler.arm(Duration::from_secs(1)).await else {
            panic!("expected a new schedule");
        };

        let disarmed = scheduler.disarm().await.unwrap();
        assert_eq!(disarmed, handle);
        assert!(!handle.is_active());
        assert!(*stop_rx.borrow());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.handle().await.is_none());

        // Second disarm is a no-op.
        assert!(scheduler.disarm().await.is_none());
    }

    #[tokio::test]
    async fn test_disarm_if_ignores_other_schedules() {
        let scheduler = ReplicationScheduler::new();
        let Armed::New(first, _) = scheduler.arm(Duration::from_secs(1)).await else {
            panic!("expected a new schedule");
        };
        scheduler.disarm().await;
        let Armed::New(second, _) = scheduler.arm(Duration::from_secs(2)).await else {
            panic!("expected a new schedule");
        };
        assert_ne!(first, second);

        assert!(!scheduler.disarm_if(first.id()).await);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(scheduler.disarm_if(second.id()).await);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_handle_is_replaced_on_arm() {
        let scheduler = ReplicationScheduler::new();
        let Armed::New(first, _) = scheduler.arm(Duration::from_secs(1)).await else {
            panic!("expected a new schedule");
        };
        first.stop();
        assert!(scheduler.handle().await.is_none());

        match scheduler.arm(Duration::from_secs(1)).await {
            Armed::New(second, _) => assert_ne!(second, first),
            Armed::Existing(_) => panic!("stopped schedule must not be reused"),
        }
    }

    #[test]
    fn test_handle_debug() {
        let (handle, _rx) = ScheduleHandle::new(3, Duration::from_millis(250));
        let debug = format!("{:?}", handle);
        assert!(debug.contains("id: 3"));
        assert!(debug.contains("active: true"));
    }
}
