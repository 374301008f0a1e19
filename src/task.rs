// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication task: one doctype's replication within a round.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──(runner starts)──→ Running ──┬──→ Completed(docs)
//!    │                                   ├──→ Failed(error)
//!    └───────────(cancel)────────────────┴──→ Cancelled
//! ```
//!
//! The cancel handle exists as soon as [`ReplicationTask::spawn`] returns,
//! before the runner has been polled, so a cancel issued immediately after
//! creation is never lost. The outcome slot is written at most once: whichever
//! of the runner and [`cancel`](ReplicationTask::cancel) gets there first
//! wins. Once cancellation is requested no completion or failure is
//! observable, even if the store finishes right after.

use crate::document::{ChangeAccumulator, Document};
use crate::error::{ReplicationError, StoreError};
use crate::metrics;
use crate::store::{LocalStore, ReplicationEvent, SyncOptions};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Instrument};

/// Observable state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, runner not started yet.
    Pending,
    /// Store replication in progress.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Completed => write!(f, "Completed"),
            TaskState::Failed => write!(f, "Failed"),
            TaskState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Changed documents, deduplicated by id, design and deleted docs removed.
    Completed(Vec<Document>),
    Failed(ReplicationError),
    Cancelled,
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Handle to one running doctype replication.
///
/// Dropping the handle cancels the replication.
pub struct ReplicationTask {
    doctype: String,
    cancel_tx: watch::Sender<bool>,
    outcome: Arc<watch::Sender<Option<TaskOutcome>>>,
    started: Arc<AtomicBool>,
}

impl ReplicationTask {
    /// Spawn the task on the current Tokio runtime.
    ///
    /// `resolve_url` is called exactly once, by the runner, right before the
    /// store replication starts. It is not called if the task is cancelled
    /// first.
    pub fn spawn<S, F>(
        doctype: impl Into<String>,
        store: Arc<S>,
        resolve_url: F,
        options: SyncOptions,
    ) -> Self
    where
        S: LocalStore,
        F: FnOnce() -> String + Send + 'static,
    {
        let doctype = doctype.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, _) = watch::channel(None);
        let outcome = Arc::new(outcome_tx);
        let started = Arc::new(AtomicBool::new(false));

        let runner = Runner {
            doctype: doctype.clone(),
            store,
            options,
            cancel_rx,
            outcome: Arc::clone(&outcome),
            started: Arc::clone(&started),
        };
        let span = info_span!("replication_task", doctype = %doctype);
        tokio::spawn(runner.run(resolve_url).instrument(span));

        Self {
            doctype,
            cancel_tx,
            outcome,
            started,
        }
    }

    pub fn doctype(&self) -> &str {
        &self.doctype
    }

    /// Request cancellation. Idempotent; a no-op once the task has settled.
    pub fn cancel(&self) {
        let settled_now = settle(&self.outcome, TaskOutcome::Cancelled);
        self.cancel_tx.send_replace(true);
        if settled_now {
            debug!(doctype = %self.doctype, "Replication task cancelled");
            metrics::record_task_outcome(&self.doctype, TaskState::Cancelled);
        }
    }

    /// Whether `cancel()` has been called.
    pub fn is_cancel_requested(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn state(&self) -> TaskState {
        match &*self.outcome.borrow() {
            Some(outcome) => outcome.state(),
            None if self.started.load(Ordering::SeqCst) => TaskState::Running,
            None => TaskState::Pending,
        }
    }

    /// Outcome if already settled.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the task to settle.
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx = self.outcome.subscribe();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // Unreachable while `self` holds the sender.
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            TaskOutcome::Failed(ReplicationError::Internal("task outcome lost".to_string()))
        })
    }
}

impl Drop for ReplicationTask {
    fn drop(&mut self) {
        // Stops the store replication if nobody settled the task yet.
        self.cancel_tx.send_replace(true);
    }
}

/// Write `outcome` if the slot is still empty. Returns whether it was written.
fn settle(slot: &watch::Sender<Option<TaskOutcome>>, outcome: TaskOutcome) -> bool {
    let mut outcome = Some(outcome);
    slot.send_if_modified(|current| {
        if current.is_none() {
            *current = outcome.take();
            true
        } else {
            false
        }
    })
}

/// The spawned half of a task.
struct Runner<S: LocalStore> {
    doctype: String,
    store: Arc<S>,
    options: SyncOptions,
    cancel_rx: watch::Receiver<bool>,
    outcome: Arc<watch::Sender<Option<TaskOutcome>>>,
    started: Arc<AtomicBool>,
}

impl<S: LocalStore> Runner<S> {
    async fn run<F>(mut self, resolve_url: F)
    where
        F: FnOnce() -> String + Send + 'static,
    {
        if *self.cancel_rx.borrow() {
            debug!("Cancelled before start");
            return;
        }
        self.started.store(true, Ordering::SeqCst);

        let outcome = match AssertUnwindSafe(self.drive(resolve_url)).catch_unwind().await {
            Ok(Some(outcome)) => outcome,
            // Cancelled: cancel() already settled the slot.
            Ok(None) => return,
            Err(_) => {
                warn!("Replication task panicked");
                TaskOutcome::Failed(ReplicationError::Internal(format!(
                    "replication task for {} panicked",
                    self.doctype
                )))
            }
        };

        let state = outcome.state();
        if settle(&self.outcome, outcome) {
            metrics::record_task_outcome(&self.doctype, state);
        } else {
            debug!(outcome = %state, "Task already settled, dropping outcome");
        }
    }

    /// Run the store replication. `None` means cancelled.
    async fn drive<F>(&mut self, resolve_url: F) -> Option<TaskOutcome>
    where
        F: FnOnce() -> String,
    {
        let url = resolve_url();
        debug!(batch_size = self.options.batch_size, "Starting store replication");

        let mut replication = match self.store.sync(&url, &self.options) {
            Ok(replication) => replication,
            Err(e) => {
                warn!(error = %e, "Store refused to start replication");
                return Some(TaskOutcome::Failed(ReplicationError::task(&self.doctype, e)));
            }
        };

        let mut accumulator = ChangeAccumulator::new();
        let mut batches = 0usize;

        loop {
            tokio::select! {
                biased;

                // Priority: cancellation pre-empts pending events
                _ = cancelled(&mut self.cancel_rx) => {
                    replication.cancel();
                    debug!(batches, "Store replication cancelled");
                    return None;
                }

                event = replication.next_event() => match event {
                    Some(ReplicationEvent::Change(docs)) => {
                        batches += 1;
                        let received = docs.len();
                        let kept = accumulator.apply(docs);
                        debug!(received, kept, "Change batch");
                    }
                    Some(ReplicationEvent::Error(e)) => {
                        warn!(error = %e, batches, "Store replication failed");
                        return Some(TaskOutcome::Failed(ReplicationError::task(&self.doctype, e)));
                    }
                    Some(ReplicationEvent::Complete) => {
                        metrics::record_task_docs(&self.doctype, accumulator.len(), accumulator.filtered());
                        debug!(
                            batches,
                            changed = accumulator.len(),
                            filtered = accumulator.filtered(),
                            "Store replication complete"
                        );
                        return Some(TaskOutcome::Completed(accumulator.into_docs()));
                    }
                    None => {
                        warn!(batches, "Store replication ended without a terminal event");
                        return Some(TaskOutcome::Failed(ReplicationError::task(
                            &self.doctype,
                            StoreError::closed("replication ended without completing"),
                        )));
                    }
                },
            }
        }
    }
}

/// Resolves once cancellation is requested or the task handle is dropped.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}
