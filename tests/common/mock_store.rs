//! Mock LocalStore for testing.
//!
//! Each `sync()` call follows the currently configured [`Behavior`] and is
//! recorded (remote URL). Cancellations observed by the store side and
//! `destroy()` calls are counted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_replication::{
    BoxFuture, Document, LocalStore, Replication, StoreError, StoreResult, SyncOptions,
};

/// What the next `sync()` calls do.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Emit every batch, then complete.
    Complete(Vec<Vec<Document>>),
    /// Emit every batch after `Duration`, then complete. Observes cancel.
    CompleteAfter(Duration, Vec<Vec<Document>>),
    /// Fail with a terminal error event.
    Fail(StoreError),
    /// Fail after `Duration`. Observes cancel.
    FailAfter(Duration, StoreError),
    /// Refuse to start (error returned from `sync()` itself).
    Refuse(StoreError),
    /// Never finish until cancelled.
    Hang,
}

impl Behavior {
    /// Complete with a single batch.
    pub fn docs(docs: Vec<Document>) -> Self {
        Behavior::Complete(vec![docs])
    }
}

/// Scripted store recording every interaction.
///
/// # Example
/// ```rust,ignore
/// let manager = SyncManager::new(["todos"], test_options(), MockStore::factory(Behavior::Hang))?;
/// let store = manager.get_store("todos").unwrap();
///
/// // ... start, advance time, stop ...
///
/// assert_eq!(store.sync_count(), 1);
/// assert_eq!(store.cancel_count(), 1);
/// ```
pub struct MockStore {
    doctype: String,
    behavior: Mutex<Behavior>,
    urls: Mutex<Vec<String>>,
    cancels: Arc<AtomicUsize>,
    destroys: AtomicUsize,
    fail_destroy: AtomicBool,
}

impl MockStore {
    pub fn new(doctype: &str, behavior: Behavior) -> Self {
        Self {
            doctype: doctype.to_string(),
            behavior: Mutex::new(behavior),
            urls: Mutex::new(Vec::new()),
            cancels: Arc::new(AtomicUsize::new(0)),
            destroys: AtomicUsize::new(0),
            fail_destroy: AtomicBool::new(false),
        }
    }

    /// Factory giving every doctype the same behavior.
    pub fn factory(behavior: Behavior) -> impl Fn(&str) -> StoreResult<MockStore> {
        move |doctype: &str| Ok(MockStore::new(doctype, behavior.clone()))
    }

    #[allow(dead_code)]
    pub fn doctype(&self) -> &str {
        &self.doctype
    }

    /// Change what subsequent `sync()` calls do.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Make `destroy()` fail.
    #[allow(dead_code)]
    pub fn fail_destroy(&self) {
        self.fail_destroy.store(true, Ordering::SeqCst);
    }

    /// Remote URLs passed to `sync()`, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn sync_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    /// Replications the store saw cancelled.
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

impl LocalStore for MockStore {
    fn sync(&self, remote_url: &str, _options: &SyncOptions) -> StoreResult<Replication> {
        self.urls.lock().unwrap().push(remote_url.to_string());
        let behavior = self.behavior.lock().unwrap().clone();

        let (emitter, replication) = Replication::channel();
        let cancels = Arc::clone(&self.cancels);

        match behavior {
            Behavior::Complete(batches) => {
                for batch in batches {
                    emitter.change(batch);
                }
                emitter.complete();
            }
            Behavior::CompleteAfter(delay, batches) => {
                tokio::spawn(async move {
                    let finished = tokio::select! {
                        _ = emitter.cancelled() => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if !finished {
                        cancels.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    for batch in batches {
                        emitter.change(batch);
                    }
                    emitter.complete();
                });
            }
            Behavior::Fail(error) => emitter.error(error),
            Behavior::FailAfter(delay, error) => {
                tokio::spawn(async move {
                    tokio::select! {
                        _ = emitter.cancelled() => {
                            cancels.fetch_add(1, Ordering::SeqCst);
                        }
                        _ = tokio::time::sleep(delay) => emitter.error(error),
                    }
                });
            }
            Behavior::Refuse(error) => return Err(error),
            Behavior::Hang => {
                tokio::spawn(async move {
                    emitter.cancelled().await;
                    cancels.fetch_add(1, Ordering::SeqCst);
                });
            }
        }

        Ok(replication)
    }

    fn destroy(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            if self.fail_destroy.load(Ordering::SeqCst) {
                return Err(StoreError::closed(format!("{} is locked", self.doctype)));
            }
            Ok(())
        })
    }
}

/// Plain document with a title field.
pub fn doc(id: &str, title: &str) -> Document {
    Document::new(id).with_field("title", serde_json::json!(title))
}
