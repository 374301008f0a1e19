// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronization manager.
//!
//! The root orchestrator that ties together:
//! - One [`LocalStore`] per doctype, created at construction
//! - Replication rounds via [`crate::round::ReplicationRound`]
//! - The periodic [`ReplicationScheduler`]
//! - The [`LifecycleBridge`] for mobile-class platforms
//!
//! # Architecture
//!
//! The manager owns the full synchronization lifecycle:
//! 1. Creates every store up front (`new`)
//! 2. Ticks every period while online and starts a round (`start`)
//! 3. Reports each successful round through `on_sync`
//! 4. Stops on the first failed round and reports it through `on_error`
//! 5. Tears everything down on `destroy`
//!
//! Background tasks (scheduler loop, lifecycle listener) hold only a weak
//! reference to the manager's shared state, so dropping the manager ends
//! them.

mod lifecycle;
mod scheduler;
mod types;

pub use lifecycle::LifecycleBridge;
pub use scheduler::{ReplicationScheduler, ScheduleHandle};
pub use types::{SchedulerState, SyncStatus};

use crate::config::ManagerConfig;
use crate::error::{ReplicationError, Result, StoreResult};
use crate::metrics;
use crate::platform::{DesktopPlatform, Platform};
use crate::round::{DoctypeUpdates, ReplicationRound, RoundOutcome, UrlProvider};
use crate::store::{LocalStore, NoOpStore, StoreFactory, SyncOptions};
use futures::future::join_all;
use scheduler::Armed;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};
use types::SyncStats;

/// Invoked with the changes of every successful round.
pub type SyncCallback = Arc<dyn Fn(&DoctypeUpdates) + Send + Sync>;

/// Invoked with the error of every failed round.
pub type ErrorCallback = Arc<dyn Fn(&ReplicationError) + Send + Sync>;

/// Construction options for [`SyncManager`].
///
/// # Example
///
/// ```rust,ignore
/// let options = ManagerOptions::new(|doctype| format!("https://cozy.example/data/{doctype}"))
///     .with_delay(Duration::from_secs(60))
///     .on_sync(|updates| println!("{} doctypes changed", updates.len()))
///     .on_error(|err| eprintln!("replication failed: {err}"));
/// ```
pub struct ManagerOptions {
    /// Scheduler and store tuning.
    pub config: ManagerConfig,
    url_provider: UrlProvider,
    on_sync: Option<SyncCallback>,
    on_error: Option<ErrorCallback>,
    platform: Arc<dyn Platform>,
}

impl ManagerOptions {
    /// Options with the default config on an always-online desktop platform.
    pub fn new(url_provider: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            config: ManagerConfig::default(),
            url_provider: Arc::new(url_provider),
            on_sync: None,
            on_error: None,
            platform: Arc::new(DesktopPlatform),
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Default tick period used when `start` is called without one.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.config.replication_delay = Some(humantime::format_duration(delay).to_string());
        self
    }

    pub fn on_sync(mut self, callback: impl Fn(&DoctypeUpdates) + Send + Sync + 'static) -> Self {
        self.on_sync = Some(Arc::new(callback));
        self
    }

    pub fn on_error(
        mut self,
        callback: impl Fn(&ReplicationError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }
}

/// State shared between the manager and its background tasks.
pub(crate) struct ManagerCore<S: LocalStore> {
    stores: Vec<(String, Arc<S>)>,
    index: HashMap<String, usize>,
    config: ManagerConfig,
    sync_options: SyncOptions,
    url_provider: UrlProvider,
    on_sync: Option<SyncCallback>,
    on_error: Option<ErrorCallback>,
    platform: Arc<dyn Platform>,
    current_round: Mutex<Option<Arc<ReplicationRound>>>,
    next_round_id: AtomicU64,
    scheduler: ReplicationScheduler,
    lifecycle: LifecycleBridge,
    stats: SyncStats,
    destroyed: AtomicBool,
}

impl<S: LocalStore> ManagerCore<S> {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(ReplicationError::Destroyed);
        }
        Ok(())
    }

    /// Arm the scheduler and spawn its loop. Returns the existing handle if
    /// one is already armed.
    async fn start(self: &Arc<Self>, delay: Option<Duration>) -> Result<ScheduleHandle> {
        self.ensure_active()?;
        let delay = self.config.resolve_delay(delay);

        match self.scheduler.arm(delay).await {
            Armed::Existing(handle) => {
                debug!(schedule_id = handle.id(), "Replication loop already running");
                Ok(handle)
            }
            Armed::New(handle, stop_rx) => {
                info!(
                    schedule_id = handle.id(),
                    delay_ms = delay.as_millis() as u64,
                    "Start replication loop"
                );
                let span = info_span!("scheduler", schedule_id = handle.id());
                let task = scheduler::run_loop(Arc::downgrade(self), handle.clone(), stop_rx);
                tokio::spawn(task.instrument(span));
                Ok(handle)
            }
        }
    }

    /// Cancel the current round, then clear the timer. Returns `false` if
    /// the scheduler was not running.
    async fn stop(&self) -> bool {
        let Some(handle) = self.scheduler.handle().await else {
            return false;
        };

        info!(schedule_id = handle.id(), "Stop replication loop");
        if let Some(round) = self.current_round().await {
            self.cancel_round(&round);
        }
        self.scheduler.disarm().await;
        true
    }

    async fn current_round(&self) -> Option<Arc<ReplicationRound>> {
        self.current_round.lock().await.clone()
    }

    /// Start a round over every store and make it the current round.
    async fn begin_round(&self) -> Arc<ReplicationRound> {
        let id = self.next_round_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut current = self.current_round.lock().await;
        let round = ReplicationRound::start(id, &self.stores, &self.url_provider, &self.sync_options);
        *current = Some(Arc::clone(&round));
        drop(current);

        self.stats.round_started();
        round
    }

    /// Cancel `round`. Returns the number of tasks that were in flight.
    fn cancel_round(&self, round: &ReplicationRound) -> usize {
        let was_settled = round.is_settled();
        let in_flight = round.cancel();
        if !was_settled {
            self.stats.round_cancelled();
            debug!(round_id = round.id(), in_flight, "Round cancelled");
        }
        in_flight
    }

    async fn report_success(&self, updates: &DoctypeUpdates) {
        debug!(
            doctypes = updates.len(),
            changed = updates.changed(),
            "Replication round synced"
        );
        self.stats.round_synced().await;
        if let Some(on_sync) = &self.on_sync {
            on_sync(updates);
        }
    }

    async fn report_failure(&self, err: &ReplicationError) {
        warn!(error = %err, doctype = err.doctype(), "Error during replication");
        self.stats.round_failed(err.to_string()).await;
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }
}

impl<S: LocalStore> Drop for ManagerCore<S> {
    fn drop(&mut self) {
        if let Some(round) = self.current_round.get_mut().take() {
            round.cancel();
        }
    }
}

/// Keeps a set of per-doctype local stores in sync with their remotes.
///
/// # Store Integration
///
/// The manager is handed a [`StoreFactory`] at construction and creates one
/// store per doctype with it. Each round asks every store to replicate
/// against the URL the provider returns for its doctype, and collects the
/// documents that changed (design documents and deletions filtered out).
///
/// Stores are only destroyed by [`destroy()`](Self::destroy).
pub struct SyncManager<S: LocalStore = NoOpStore> {
    core: Arc<ManagerCore<S>>,
}

impl SyncManager<NoOpStore> {
    /// Manager over no-op stores (for testing/standalone).
    pub fn standalone<I, D>(doctypes: I, options: ManagerOptions) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        Self::new(doctypes, options, |_: &str| -> StoreResult<NoOpStore> { Ok(NoOpStore) })
    }
}

impl<S: LocalStore> SyncManager<S> {
    /// Create a manager, building one store per doctype.
    ///
    /// Fails with [`ReplicationError::Config`] on a duplicate doctype or if
    /// the factory cannot create a store. No background task is started.
    pub fn new<I, D, F>(doctypes: I, options: ManagerOptions, factory: F) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
        F: StoreFactory<S>,
    {
        let mut stores = Vec::new();
        let mut index = HashMap::new();

        for doctype in doctypes {
            let doctype = doctype.into();
            if index.contains_key(&doctype) {
                return Err(ReplicationError::Config(format!("duplicate doctype: {}", doctype)));
            }
            let store = factory.create(&doctype).map_err(|e| {
                ReplicationError::Config(format!("failed to create store for {}: {}", doctype, e))
            })?;
            index.insert(doctype.clone(), stores.len());
            stores.push((doctype, Arc::new(store)));
        }

        info!(doctypes = stores.len(), "Sync manager created");

        let ManagerOptions {
            config,
            url_provider,
            on_sync,
            on_error,
            platform,
        } = options;

        let sync_options = SyncOptions {
            batch_size: config.batch_size,
        };

        Ok(Self {
            core: Arc::new(ManagerCore {
                stores,
                index,
                config,
                sync_options,
                url_provider,
                on_sync,
                on_error,
                platform,
                current_round: Mutex::new(None),
                next_round_id: AtomicU64::new(0),
                scheduler: ReplicationScheduler::new(),
                lifecycle: LifecycleBridge::new(),
                stats: SyncStats::default(),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.core.config
    }

    /// Managed doctypes, in construction order.
    pub fn doctypes(&self) -> Vec<&str> {
        self.core.stores.iter().map(|(d, _)| d.as_str()).collect()
    }

    /// Store for a doctype.
    pub fn store(&self, doctype: &str) -> Result<&Arc<S>> {
        self.core.ensure_active()?;
        self.core
            .index
            .get(doctype)
            .map(|&i| &self.core.stores[i].1)
            .ok_or_else(|| ReplicationError::UnknownDoctype(doctype.to_string()))
    }

    /// Store for a doctype, `None` if unknown or destroyed.
    pub fn get_store(&self, doctype: &str) -> Option<&Arc<S>> {
        self.store(doctype).ok()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.core.scheduler.state()
    }

    /// Receiver to watch scheduler state changes.
    pub fn state_receiver(&self) -> watch::Receiver<SchedulerState> {
        self.core.scheduler.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler_state() == SchedulerState::Running
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Start periodic replication.
    ///
    /// The period is `delay`, else the configured `replication_delay`, else
    /// 30 seconds. The first round is attempted one period from now. While
    /// running, calling `start` again returns the existing handle unchanged.
    ///
    /// Also registers the lifecycle bridge on mobile-class platforms.
    pub async fn start(&self, delay: Option<Duration>) -> Result<ScheduleHandle> {
        let handle = self.core.start(delay).await?;
        self.core.lifecycle.register(&self.core).await;
        Ok(handle)
    }

    /// Stop periodic replication, cancelling the current round first.
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.core.ensure_active()?;
        self.core.stop().await;
        Ok(())
    }

    /// Run one round now, outside the schedule.
    ///
    /// Invokes `on_sync` / `on_error` like a scheduled round. A failure
    /// does not stop a running scheduler. A cancelled round returns
    /// [`ReplicationError::Cancelled`] and invokes no callback.
    pub async fn replicate_once(&self) -> Result<DoctypeUpdates> {
        self.core.ensure_active()?;
        let round = self.core.begin_round().await;

        match round.wait().await {
            RoundOutcome::Synced(updates) => {
                self.core.report_success(&updates).await;
                Ok(updates)
            }
            RoundOutcome::Failed(err) => {
                self.core.report_failure(&err).await;
                Err(err)
            }
            RoundOutcome::Cancelled => {
                info!(round_id = round.id(), "On-demand replication cancelled");
                Err(ReplicationError::Cancelled)
            }
        }
    }

    /// Cancel every task of the current round. Returns how many were in
    /// flight.
    pub async fn cancel_current_replications(&self) -> Result<usize> {
        self.core.ensure_active()?;
        match self.core.current_round().await {
            Some(round) => Ok(self.core.cancel_round(&round)),
            None => {
                warn!("No current replications");
                Ok(0)
            }
        }
    }

    /// Wait for the current round to settle. `None` if no round was ever
    /// started.
    pub async fn wait_for_current_replications(&self) -> Result<Option<RoundOutcome>> {
        self.core.ensure_active()?;
        match self.core.current_round().await {
            Some(round) => Ok(Some(round.wait().await)),
            None => Ok(None),
        }
    }

    /// Diagnostics snapshot. Performs no store I/O.
    pub async fn status(&self) -> SyncStatus {
        let core = &self.core;
        let current = core.current_round().await;

        SyncStatus {
            scheduler: core.scheduler.state(),
            destroyed: core.is_destroyed(),
            doctypes: core.stores.len(),
            current_round: current.as_ref().map(|r| r.id()),
            round_in_flight: current.as_ref().is_some_and(|r| !r.is_settled()),
            rounds_started: core.stats.rounds_started.load(Ordering::Relaxed),
            rounds_synced: core.stats.rounds_synced.load(Ordering::Relaxed),
            rounds_failed: core.stats.rounds_failed.load(Ordering::Relaxed),
            rounds_cancelled: core.stats.rounds_cancelled.load(Ordering::Relaxed),
            ticks_skipped_offline: core.stats.ticks_skipped_offline.load(Ordering::Relaxed),
            ticks_skipped_busy: core.stats.ticks_skipped_busy.load(Ordering::Relaxed),
            last_error: core.stats.last_error.lock().await.clone(),
            millis_since_success: core.stats.millis_since_success().await,
            lifecycle_registered: core.lifecycle.is_registered().await,
        }
    }

    /// Tear down: stop the scheduler, drop the lifecycle subscription, then
    /// destroy every store concurrently.
    ///
    /// Afterwards every operation fails with [`ReplicationError::Destroyed`].
    /// Calling `destroy` again is a no-op, even if the first call reported a
    /// store failure.
    pub async fn destroy(&self) -> Result<()> {
        if self.core.destroyed.swap(true, Ordering::SeqCst) {
            debug!("Sync manager already destroyed");
            return Ok(());
        }

        info!(doctypes = self.core.stores.len(), "Destroying sync manager");

        self.core.stop().await;
        self.core.lifecycle.unregister().await;
        if let Some(round) = self.core.current_round().await {
            self.core.cancel_round(&round);
        }

        let results = join_all(
            self.core
                .stores
                .iter()
                .map(|(doctype, store)| async move { (doctype.as_str(), store.destroy().await) }),
        )
        .await;

        let mut first_error = None;
        for (doctype, result) in results {
            match result {
                Ok(()) => {
                    metrics::record_store_destroy(doctype, true);
                    debug!(doctype, "Store destroyed");
                }
                Err(e) => {
                    metrics::record_store_destroy(doctype, false);
                    warn!(doctype, error = %e, "Failed to destroy store");
                    if first_error.is_none() {
                        first_error = Some(ReplicationError::StoreDestroy {
                            doctype: doctype.to_string(),
                            source: e,
                        });
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Sync manager destroyed");
                Ok(())
            }
        }
    }
}
