// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle bridge: couples the scheduler to foreground/background
//! transitions on mobile-class devices.
//!
//! - `Pause` / `Resign` stop the scheduler (and cancel the current round).
//! - `Resume` starts it again with the configured replication delay.
//!
//! The subscription is a spawned listener task owned by the bridge. It is
//! registered at most once per manager and aborted on `destroy()` (or when
//! the manager is dropped).

use super::ManagerCore;
use crate::metrics;
use crate::platform::LifecycleEvent;
use crate::store::LocalStore;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Owns the lifecycle listener task.
pub struct LifecycleBridge {
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleBridge {
    pub(crate) fn new() -> Self {
        Self {
            listener: Mutex::new(None),
        }
    }

    /// Whether a listener is currently registered.
    pub async fn is_registered(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    /// Subscribe to the platform's lifecycle events.
    ///
    /// Returns `true` if a listener was spawned by this call. Inert when the
    /// bridge is disabled, the platform is not mobile-class, or a listener
    /// already exists.
    pub(crate) async fn register<S: LocalStore>(&self, core: &Arc<ManagerCore<S>>) -> bool {
        if !core.config.lifecycle_enabled || !core.platform.is_mobile() {
            return false;
        }

        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return false;
        }

        let Some(events) = core.platform.lifecycle_events() else {
            debug!("Platform exposes no lifecycle events");
            return false;
        };

        let task = listen(Arc::downgrade(core), events).instrument(info_span!("lifecycle"));
        *listener = Some(tokio::spawn(task));
        info!("Lifecycle listener registered");
        true
    }

    /// Abort the listener. Returns `true` if one was registered.
    pub(crate) async fn unregister(&self) -> bool {
        match self.listener.lock().await.take() {
            Some(handle) => {
                handle.abort();
                debug!("Lifecycle listener unregistered");
                true
            }
            None => false,
        }
    }
}

impl Drop for LifecycleBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

async fn listen<S: LocalStore>(
    core: Weak<ManagerCore<S>>,
    mut events: broadcast::Receiver<LifecycleEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Lifecycle listener lagged, events dropped");
                continue;
            }
            Err(RecvError::Closed) => {
                debug!("Lifecycle event source closed");
                break;
            }
        };

        let Some(core) = core.upgrade() else { break };
        metrics::record_lifecycle_event(&event.to_string());

        match event {
            LifecycleEvent::Pause | LifecycleEvent::Resign => {
                info!(%event, "App left the foreground, stopping replication");
                core.stop().await;
            }
            LifecycleEvent::Resume => {
                match core.start(None).await {
                    Ok(handle) => {
                        info!(%event, schedule_id = handle.id(), "App back in the foreground, replication started");
                    }
                    Err(e) => {
                        warn!(%event, error = %e, "Could not restart replication");
                    }
                }
            }
        }
    }
}
