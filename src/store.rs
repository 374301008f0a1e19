// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local store integration traits.
//!
//! Defines the narrow contract the manager needs from a local document store
//! engine. The engine itself (persistence, conflict handling, transport to the
//! remote endpoint) stays outside this crate.
//!
//! A store replication is event-driven and cancellable. The store gets the
//! [`ReplicationEmitter`] half of [`Replication::channel()`] and reports
//! change batches followed by exactly one terminal event; the manager keeps
//! the [`Replication`] half, reads events and may cancel.
//!
//! # Example
//!
//! ```rust,no_run
//! use store_replication::store::{BoxFuture, LocalStore, Replication, SyncOptions};
//! use store_replication::{Document, StoreResult};
//!
//! struct MyStore { /* ... */ }
//!
//! impl LocalStore for MyStore {
//!     fn sync(&self, remote_url: &str, options: &SyncOptions) -> StoreResult<Replication> {
//!         let (emitter, replication) = Replication::channel();
//!         let url = remote_url.to_string();
//!         let batch_size = options.batch_size;
//!         tokio::spawn(async move {
//!             // Talk to `url`, `batch_size` documents at a time...
//!             emitter.change(vec![Document::new("todo-1")]);
//!             emitter.complete();
//!         });
//!         Ok(replication)
//!     }
//!
//!     fn destroy(&self) -> BoxFuture<'_, StoreResult<()>> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use crate::config::DEFAULT_BATCH_SIZE;
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, watch};

/// Type alias for boxed async futures (keeps the trait object-safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Options for a single store replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Documents per change batch.
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Event emitted by a running replication.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// A batch of documents changed (pulled or pushed).
    Change(Vec<Document>),
    /// Terminal: replication failed.
    Error(StoreError),
    /// Terminal: replication finished.
    Complete,
}

impl ReplicationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReplicationEvent::Change(_))
    }
}

/// Manager-side half of a store replication.
pub struct Replication {
    events: mpsc::UnboundedReceiver<ReplicationEvent>,
    cancel_tx: watch::Sender<bool>,
}

impl Replication {
    /// Create a connected emitter/replication pair.
    pub fn channel() -> (ReplicationEmitter, Replication) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            ReplicationEmitter {
                events: events_tx,
                cancel_rx,
            },
            Replication {
                events: events_rx,
                cancel_tx,
            },
        )
    }

    /// A replication that has already completed with no changes.
    pub fn completed() -> Replication {
        let (emitter, replication) = Self::channel();
        emitter.complete();
        replication
    }

    /// Next event, or `None` once the emitter is gone and the queue drained.
    pub async fn next_event(&mut self) -> Option<ReplicationEvent> {
        self.events.recv().await
    }

    /// Ask the store to stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// Store-side half of a replication.
pub struct ReplicationEmitter {
    events: mpsc::UnboundedSender<ReplicationEvent>,
    cancel_rx: watch::Receiver<bool>,
}

impl ReplicationEmitter {
    /// Report a change batch. Returns `false` if nobody is listening any
    /// more (cancelled or dropped); the store should stop.
    pub fn change(&self, docs: Vec<Document>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.events.send(ReplicationEvent::Change(docs)).is_ok()
    }

    /// Terminal failure.
    pub fn error(self, error: StoreError) {
        let _ = self.events.send(ReplicationEvent::Error(error));
    }

    /// Terminal success.
    pub fn complete(self) {
        let _ = self.events.send(ReplicationEvent::Complete);
    }

    /// Whether the manager cancelled (or dropped) this replication.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow() || self.events.is_closed()
    }

    /// Resolves once the replication is cancelled or its manager side dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // Err means the Replication was dropped, which counts as cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// What the manager needs from a local document store.
///
/// One instance exists per doctype and is never shared across doctypes.
pub trait LocalStore: Send + Sync + 'static {
    /// Begin a bidirectional replication against `remote_url`.
    ///
    /// Failing here is equivalent to emitting an immediate `Error` event.
    /// Connection, auth and transport failures are reported through the
    /// returned replication's terminal error; the store never retries.
    fn sync(&self, remote_url: &str, options: &SyncOptions) -> StoreResult<Replication>;

    /// Destroy the store and its persisted data.
    fn destroy(&self) -> BoxFuture<'_, StoreResult<()>>;
}

/// Creates the store for a doctype at manager construction.
pub trait StoreFactory<S: LocalStore> {
    fn create(&self, doctype: &str) -> StoreResult<S>;
}

impl<S, F> StoreFactory<S> for F
where
    S: LocalStore,
    F: Fn(&str) -> StoreResult<S>,
{
    fn create(&self, doctype: &str) -> StoreResult<S> {
        self(doctype)
    }
}

/// Store that completes every replication immediately with no changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStore;

impl LocalStore for NoOpStore {
    fn sync(&self, _remote_url: &str, _options: &SyncOptions) -> StoreResult<Replication> {
        Ok(Replication::completed())
    }

    fn destroy(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Closure-backed store for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Script = dyn Fn(&str, ReplicationEmitter) + Send + Sync;

    /// Runs `script` on every `sync()`, recording the URLs it was given.
    pub struct FnStore {
        script: Box<Script>,
        pub urls: Mutex<Vec<String>>,
        pub destroyed: AtomicUsize,
    }

    impl std::fmt::Debug for FnStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FnStore")
                .field("urls", &self.urls)
                .field("destroyed", &self.destroyed)
                .finish_non_exhaustive()
        }
    }

    impl FnStore {
        pub fn new(script: impl Fn(&str, ReplicationEmitter) + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                urls: Mutex::new(Vec::new()),
                destroyed: AtomicUsize::new(0),
            }
        }

        /// Emits `docs` as one batch, then completes.
        pub fn completing(docs: Vec<Document>) -> Self {
            Self::new(move |_, emitter| {
                emitter.change(docs.clone());
                emitter.complete();
            })
        }

        /// Fails immediately.
        pub fn failing(error: StoreError) -> Self {
            Self::new(move |_, emitter| emitter.error(error.clone()))
        }

        /// Never finishes until cancelled.
        pub fn hanging() -> Self {
            Self::new(|_, emitter| {
                tokio::spawn(async move {
                    emitter.cancelled().await;
                });
            })
        }

        pub fn sync_count(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    impl LocalStore for FnStore {
        fn sync(&self, remote_url: &str, _options: &SyncOptions) -> StoreResult<Replication> {
            self.urls.lock().unwrap().push(remote_url.to_string());
            let (emitter, replication) = Replication::channel();
            (self.script)(remote_url, emitter);
            Ok(replication)
        }

        fn destroy(&self) -> BoxFuture<'_, StoreResult<()>> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_replication() {
        let mut replication = Replication::completed();
        assert_eq!(replication.next_event().await, Some(ReplicationEvent::Complete));
        assert_eq!(replication.next_event().await, None);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (emitter, mut replication) = Replication::channel();
        assert!(emitter.change(vec![Document::new("a")]));
        assert!(emitter.change(vec![Document::new("b")]));
        emitter.error(StoreError::transport("reset"));

        assert_eq!(
            replication.next_event().await,
            Some(ReplicationEvent::Change(vec![Document::new("a")]))
        );
        assert_eq!(
            replication.next_event().await,
            Some(ReplicationEvent::Change(vec![Document::new("b")]))
        );
        let last = replication.next_event().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(last, ReplicationEvent::Error(StoreError::transport("reset")));
    }

    #[tokio::test]
    async fn test_cancel_reaches_emitter() {
        let (emitter, replication) = Replication::channel();
        assert!(!emitter.is_cancelled());

        replication.cancel();
        replication.cancel();
        assert!(replication.is_cancelled());
        assert!(emitter.is_cancelled());
        emitter.cancelled().await;
        assert!(!emitter.change(vec![Document::new("late")]));
    }

    #[tokio::test]
    async fn test_dropped_replication_counts_as_cancelled() {
        let (emitter, replication) = Replication::channel();
        drop(replication);
        assert!(emitter.is_cancelled());
        emitter.cancelled().await;
    }

    #[tokio::test]
    async fn test_noop_store() {
        let store = NoOpStore;
        let mut replication = store.sync("https://remote/db", &SyncOptions::default()).unwrap();
        assert_eq!(replication.next_event().await, Some(ReplicationEvent::Complete));
        assert!(store.destroy().await.is_ok());
    }

    #[test]
    fn test_closure_factory() {
        let factory = |doctype: &str| -> StoreResult<NoOpStore> {
            if doctype.is_empty() {
                Err(StoreError::closed("empty doctype"))
            } else {
                Ok(NoOpStore)
            }
        };
        assert!(factory.create("io.cozy.todos").is_ok());
        assert!(factory.create("").is_err());
    }

    #[test]
    fn test_default_sync_options() {
        assert_eq!(SyncOptions::default().batch_size, 1000);
    }
}
