//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - Scripted `LocalStore` mock recording syncs, cancels and destroys
//! - Callback recorder for `on_sync` / `on_error`
//! - Document and option helpers

pub mod mock_store;

pub use mock_store::*;

use std::sync::{Arc, Mutex};
use store_replication::{DoctypeUpdates, ManagerConfig, ManagerOptions, ReplicationError};

/// URL every mock doctype is synced against.
pub fn remote_url(doctype: &str) -> String {
    format!("https://remote.example/data/{}", doctype)
}

/// Options with a 1s default period, no lifecycle bridge, and an
/// always-online desktop platform.
pub fn test_options() -> ManagerOptions {
    ManagerOptions::new(remote_url).with_config(ManagerConfig::for_testing())
}

/// Records every callback invocation for assertions.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    synced: Arc<Mutex<Vec<DoctypeUpdates>>>,
    errors: Arc<Mutex<Vec<ReplicationError>>>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire both callbacks of `options` to this recorder.
    pub fn attach(&self, options: ManagerOptions) -> ManagerOptions {
        let synced = Arc::clone(&self.synced);
        let errors = Arc::clone(&self.errors);
        options
            .on_sync(move |updates| synced.lock().unwrap().push(updates.clone()))
            .on_error(move |err| errors.lock().unwrap().push(err.clone()))
    }

    pub fn synced(&self) -> Vec<DoctypeUpdates> {
        self.synced.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ReplicationError> {
        self.errors.lock().unwrap().clone()
    }

    /// Total callback invocations of either kind.
    pub fn calls(&self) -> usize {
        self.synced.lock().unwrap().len() + self.errors.lock().unwrap().len()
    }
}
