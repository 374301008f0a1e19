// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Manager state and status types.
//!
//! # Scheduler States
//!
//! ```text
//!            start()
//! Stopped ──────────────→ Running
//!    ↑                       │
//!    │  stop() / Pause /     │
//!    │  Resign / round fails │
//!    └───────────────────────┘
//! ```
//!
//! A destroyed manager stays `Stopped` forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

/// State of the replication scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// No timer. Rounds only run through `replicate_once()`.
    #[default]
    Stopped,

    /// Timer armed; a round is attempted every period while online.
    Running,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "Stopped"),
            SchedulerState::Running => write!(f, "Running"),
        }
    }
}

/// Point-in-time view of the manager, for diagnostics and status endpoints.
///
/// Collected from atomics and locks only; never touches a store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Scheduler state.
    pub scheduler: SchedulerState,

    /// Whether `destroy()` has been called.
    pub destroyed: bool,

    /// Number of managed doctypes.
    pub doctypes: usize,

    /// Id of the current round, if any round was ever started.
    pub current_round: Option<u64>,

    /// Whether the current round has not settled yet.
    pub round_in_flight: bool,

    /// Rounds started (scheduled and on demand).
    pub rounds_started: u64,

    /// Rounds that reported changes.
    pub rounds_synced: u64,

    /// Rounds that failed.
    pub rounds_failed: u64,

    /// Rounds that were cancelled before settling.
    pub rounds_cancelled: u64,

    /// Ticks skipped because the device was offline.
    pub ticks_skipped_offline: u64,

    /// Ticks skipped because a round was still in flight.
    pub ticks_skipped_busy: u64,

    /// Message of the most recent failure.
    pub last_error: Option<String>,

    /// Milliseconds since the last successful round (`None` if never).
    pub millis_since_success: Option<u64>,

    /// Whether the lifecycle bridge currently holds a subscription.
    pub lifecycle_registered: bool,
}

/// Running counters behind [`SyncStatus`].
#[derive(Debug, Default)]
pub(crate) struct SyncStats {
    pub rounds_started: AtomicU64,
    pub rounds_synced: AtomicU64,
    pub rounds_failed: AtomicU64,
    pub rounds_cancelled: AtomicU64,
    pub ticks_skipped_offline: AtomicU64,
    pub ticks_skipped_busy: AtomicU64,
    pub last_error: Mutex<Option<String>>,
    pub last_success: Mutex<Option<Instant>>,
}

impl SyncStats {
    pub fn round_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn round_synced(&self) {
        self.rounds_synced.fetch_add(1, Ordering::Relaxed);
        *self.last_success.lock().await = Some(Instant::now());
    }

    pub async fn round_failed(&self, message: String) {
        self.rounds_failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().await = Some(message);
    }

    pub fn round_cancelled(&self) {
        self.rounds_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped_offline(&self) {
        self.ticks_skipped_offline.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped_busy(&self) {
        self.ticks_skipped_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn millis_since_success(&self) -> Option<u64> {
        self.last_success
            .lock()
            .await
            .map(|at| at.elapsed().as_millis() as u64)
    }
}
