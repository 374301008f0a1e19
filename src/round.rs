// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication round: one synchronization attempt across all doctypes.
//!
//! # Algorithm
//!
//! 1. Spawn one [`ReplicationTask`] per doctype, all at once. Doctypes never
//!    wait on each other.
//! 2. Join every task, in completion order.
//! 3. First task failure: cancel the siblings still running, let them
//!    settle, report that first error.
//! 4. All tasks completed: report the doctype → changes mapping.
//!
//! The outcome is all-or-nothing. A round that fails reports no partial
//! changes even if some doctypes finished before the failing one.
//!
//! The outcome is published on a watch channel, so the scheduler, an
//! on-demand caller and any number of `wait_for_current_replications()`
//! callers can observe the same round.

use crate::document::Document;
use crate::error::ReplicationError;
use crate::metrics;
use crate::store::{LocalStore, SyncOptions};
use crate::task::{ReplicationTask, TaskOutcome, TaskState};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Maps a doctype to its current remote endpoint.
///
/// Called once per round per doctype, so it may hand out rotating or
/// expiring URLs.
pub type UrlProvider = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Changed documents per doctype from a successful round, in configured
/// doctype order.
///
/// Equality is order-sensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoctypeUpdates {
    entries: Vec<(String, Vec<Document>)>,
}

impl DoctypeUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the documents for `doctype`, keeping its position if present.
    pub fn insert(&mut self, doctype: impl Into<String>, docs: Vec<Document>) {
        let doctype = doctype.into();
        match self.entries.iter_mut().find(|(d, _)| *d == doctype) {
            Some((_, existing)) => *existing = docs,
            None => self.entries.push((doctype, docs)),
        }
    }

    pub fn get(&self, doctype: &str) -> Option<&Vec<Document>> {
        self.entries
            .iter()
            .find(|(d, _)| d == doctype)
            .map(|(_, docs)| docs)
    }

    /// Number of doctypes, including those with no changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn doctypes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(d, _)| d.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.entries.iter().map(|(d, docs)| (d.as_str(), docs.as_slice()))
    }

    /// Total changed documents across doctypes.
    pub fn changed(&self) -> usize {
        self.entries.iter().map(|(_, docs)| docs.len()).sum()
    }
}

impl FromIterator<(String, Vec<Document>)> for DoctypeUpdates {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Document>)>>(iter: I) -> Self {
        let mut updates = Self::new();
        for (doctype, docs) in iter {
            updates.insert(doctype, docs);
        }
        updates
    }
}

impl std::ops::Index<&str> for DoctypeUpdates {
    type Output = Vec<Document>;

    fn index(&self, doctype: &str) -> &Vec<Document> {
        self.get(doctype).expect("doctype not present in updates")
    }
}

impl IntoIterator for DoctypeUpdates {
    type Item = (String, Vec<Document>);
    type IntoIter = std::vec::IntoIter<(String, Vec<Document>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Settled result of a round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// Every doctype replicated. Contains an entry for every doctype,
    /// possibly empty.
    Synced(DoctypeUpdates),
    /// At least one doctype failed; carries the first failure.
    Failed(ReplicationError),
    /// Cancelled before it settled.
    Cancelled,
}

impl RoundOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, RoundOutcome::Synced(_))
    }

    /// Convert into the caller-facing result.
    pub fn into_result(self) -> crate::Result<DoctypeUpdates> {
        match self {
            RoundOutcome::Synced(updates) => Ok(updates),
            RoundOutcome::Failed(err) => Err(err),
            RoundOutcome::Cancelled => Err(ReplicationError::Cancelled),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RoundOutcome::Synced(_) => "synced",
            RoundOutcome::Failed(_) => "failed",
            RoundOutcome::Cancelled => "cancelled",
        }
    }
}

/// One in-flight round.
pub struct ReplicationRound {
    id: u64,
    tasks: Vec<ReplicationTask>,
    cancel_requested: AtomicBool,
    outcome: watch::Sender<Option<RoundOutcome>>,
    started_at: Instant,
}

impl ReplicationRound {
    /// Start a round over `stores`.
    ///
    /// Every task (and its cancel handle) exists when this returns.
    pub fn start<S: LocalStore>(
        id: u64,
        stores: &[(String, Arc<S>)],
        url_provider: &UrlProvider,
        options: &SyncOptions,
    ) -> Arc<Self> {
        let span = info_span!("round", round_id = id);

        let tasks: Vec<ReplicationTask> = span.in_scope(|| {
            debug!(doctypes = stores.len(), "Starting replication round");
            stores
                .iter()
                .map(|(doctype, store)| {
                    let provider = Arc::clone(url_provider);
                    let for_doctype = doctype.clone();
                    ReplicationTask::spawn(
                        doctype.clone(),
                        Arc::clone(store),
                        move || provider(&for_doctype),
                        options.clone(),
                    )
                })
                .collect()
        });

        let (outcome, _) = watch::channel(None);
        let round = Arc::new(Self {
            id,
            tasks,
            cancel_requested: AtomicBool::new(false),
            outcome,
            started_at: Instant::now(),
        });

        metrics::record_round_started();
        tokio::spawn(Arc::clone(&round).join().instrument(span));
        round
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Doctypes in this round, in configuration order.
    pub fn doctypes(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.doctype()).collect()
    }

    /// Current state of every task.
    pub fn task_states(&self) -> Vec<(String, TaskState)> {
        self.tasks
            .iter()
            .map(|t| (t.doctype().to_string(), t.state()))
            .collect()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Outcome if already settled.
    pub fn outcome(&self) -> Option<RoundOutcome> {
        self.outcome.borrow().clone()
    }

    /// Cancel every task that has not settled. Returns how many were
    /// still unsettled. No-op on a settled round.
    pub fn cancel(&self) -> usize {
        self.cancel_requested.store(true, Ordering::SeqCst);
        let in_flight = self.cancel_tasks();
        self.settle(RoundOutcome::Cancelled);
        in_flight
    }

    /// Wait for the round to settle.
    pub async fn wait(&self) -> RoundOutcome {
        let mut rx = self.outcome.subscribe();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            RoundOutcome::Failed(ReplicationError::Internal("round outcome lost".to_string()))
        })
    }

    fn cancel_tasks(&self) -> usize {
        let mut in_flight = 0;
        for task in &self.tasks {
            if !task.state().is_terminal() {
                in_flight += 1;
            }
            task.cancel();
        }
        in_flight
    }

    fn settle(&self, outcome: RoundOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.outcome.send_if_modified(|current| {
            if current.is_none() {
                *current = outcome.take();
                true
            } else {
                false
            }
        })
    }

    async fn join(self: Arc<Self>) {
        let mut pending: FuturesUnordered<_> = self
            .tasks
            .iter()
            .map(|task| async move { (task.doctype(), task.wait().await) })
            .collect();

        let mut completed: HashMap<&str, Vec<Document>> = HashMap::with_capacity(self.tasks.len());
        let mut first_error: Option<ReplicationError> = None;

        while let Some((doctype, outcome)) = pending.next().await {
            match outcome {
                TaskOutcome::Completed(docs) => {
                    debug!(doctype, changed = docs.len(), "Task completed");
                    completed.insert(doctype, docs);
                }
                TaskOutcome::Failed(err) => {
                    if first_error.is_none() {
                        warn!(doctype, error = %err, "Task failed, cancelling sibling tasks");
                        first_error = Some(err);
                        let cancelled = self.cancel_tasks();
                        if cancelled > 0 {
                            debug!(cancelled, "Sibling tasks cancelled");
                        }
                    } else {
                        debug!(doctype, error = %err, "Additional task failure ignored");
                    }
                }
                TaskOutcome::Cancelled => {
                    debug!(doctype, "Task cancelled");
                }
            }
        }
        drop(pending);

        let outcome = match first_error {
            Some(err) => RoundOutcome::Failed(err),
            None if self.is_cancel_requested() => RoundOutcome::Cancelled,
            None => RoundOutcome::Synced(
                self.tasks
                    .iter()
                    .filter_map(|task| {
                        completed
                            .remove(task.doctype())
                            .map(|docs| (task.doctype().to_string(), docs))
                    })
                    .collect(),
            ),
        };

        let elapsed = self.started_at.elapsed();
        let label = outcome.label();
        if self.settle(outcome) {
            metrics::record_round_outcome(label, elapsed);
            info!(outcome = label, elapsed_ms = elapsed.as_millis() as u64, "Replication round settled");
        } else {
            metrics::record_round_outcome("cancelled", elapsed);
            debug!(outcome = label, "Round was cancelled before it settled");
        }
    }
}
