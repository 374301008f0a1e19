// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Store Replication
//!
//! Keeps a set of per-doctype local document stores in sync with their
//! remote counterparts, and reports which documents changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              SyncManager                                  │
//! │                                                                           │
//! │  ┌───────────────────┐   tick   ┌──────────────────┐                      │
//! │  │ ReplicationSched. │─────────►│ ReplicationRound │                      │
//! │  │ (timer, online?)  │          │ (one per tick)   │                      │
//! │  └───────────────────┘          └──────────────────┘                      │
//! │         ▲                          │    │    │                            │
//! │         │ pause/resume             ▼    ▼    ▼                            │
//! │  ┌───────────────────┐   ┌─────────────────────────────┐                  │
//! │  │ LifecycleBridge   │   │ ReplicationTask per doctype │──► LocalStore    │
//! │  │ (mobile only)     │   │ (filter + accumulate)       │    (sync)        │
//! │  └───────────────────┘   └─────────────────────────────┘                  │
//! │                                                                           │
//! │        on_sync(doctype → changed docs)   /   on_error(first failure)      │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Round Semantics
//!
//! 1. Every doctype replicates concurrently against the URL the provider
//!    returns for it
//! 2. Design documents and deletions are dropped; the last version of each
//!    document id wins
//! 3. All doctypes succeed → `on_sync`; any fails → the siblings are
//!    cancelled, the scheduler stops, `on_error` fires once
//!
//! ## Usage
//!
//! ```rust,no_run
//! use store_replication::{ManagerOptions, SyncManager};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ManagerOptions::new(|doctype| format!("https://cozy.example/data/{doctype}"))
//!         .on_sync(|updates| println!("{} doctypes synced", updates.len()));
//!
//!     let manager = SyncManager::standalone(["io.cozy.todos"], options)
//!         .expect("valid doctypes");
//!     manager.start(Some(Duration::from_secs(30))).await.expect("Failed to start");
//!
//!     // Replicates until stopped
//!     manager.destroy().await.expect("Failed to destroy");
//! }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod platform;
pub mod round;
pub mod store;
pub mod task;

// Re-exports for convenience
pub use config::{ManagerConfig, OverlapPolicy};
pub use document::{ChangeAccumulator, Document};
pub use error::{ReplicationError, Result, StoreError, StoreErrorKind, StoreResult};
pub use manager::{
    ErrorCallback, LifecycleBridge, ManagerOptions, ReplicationScheduler, ScheduleHandle,
    SchedulerState, SyncCallback, SyncManager, SyncStatus,
};
pub use platform::{DesktopPlatform, LifecycleEvent, ManualPlatform, Platform};
pub use round::{DoctypeUpdates, ReplicationRound, RoundOutcome, UrlProvider};
pub use store::{
    BoxFuture, LocalStore, NoOpStore, Replication, ReplicationEmitter, ReplicationEvent,
    StoreFactory, SyncOptions,
};
pub use task::{ReplicationTask, TaskOutcome, TaskState};
