// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Device platform integration.
//!
//! The manager asks the platform two things: whether the device is online
//! (gating every scheduled tick) and, on mobile-class devices, for a stream of
//! foreground/background transitions (driving the lifecycle bridge).

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Device foreground/background transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// App moved to the background.
    Pause,
    /// App lost foreground focus (e.g., incoming call overlay).
    Resign,
    /// App returned to the foreground.
    Resume,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Pause => write!(f, "pause"),
            LifecycleEvent::Resign => write!(f, "resign"),
            LifecycleEvent::Resume => write!(f, "resume"),
        }
    }
}

/// What the manager needs from the host device.
pub trait Platform: Send + Sync + 'static {
    /// Current network reachability.
    fn is_online(&self) -> bool;

    /// Mobile-class device (has foreground/background lifecycle).
    fn is_mobile(&self) -> bool {
        false
    }

    /// Subscribe to lifecycle transitions. `None` when the platform has none.
    fn lifecycle_events(&self) -> Option<broadcast::Receiver<LifecycleEvent>> {
        None
    }
}

/// Always online, no lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopPlatform;

impl Platform for DesktopPlatform {
    fn is_online(&self) -> bool {
        true
    }
}

/// Platform driven by the host application.
///
/// The host forwards OS reachability changes to [`set_online`](Self::set_online)
/// and OS lifecycle notifications to [`emit`](Self::emit).
pub struct ManualPlatform {
    online: AtomicBool,
    mobile: bool,
    events: broadcast::Sender<LifecycleEvent>,
}

impl ManualPlatform {
    /// Online desktop-class platform.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            online: AtomicBool::new(true),
            mobile: false,
            events,
        }
    }

    /// Online mobile-class platform.
    pub fn mobile() -> Self {
        Self {
            mobile: true,
            ..Self::new()
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Forward a lifecycle transition. Returns the number of listeners.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Current lifecycle listener count.
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for ManualPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for ManualPlatform {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_mobile(&self) -> bool {
        self.mobile
    }

    fn lifecycle_events(&self) -> Option<broadcast::Receiver<LifecycleEvent>> {
        self.mobile.then(|| self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_platform() {
        let platform = DesktopPlatform;
        assert!(platform.is_online());
        assert!(!platform.is_mobile());
        assert!(platform.lifecycle_events().is_none());
    }

    #[test]
    fn test_manual_platform_reachability() {
        let platform = ManualPlatform::new();
        assert!(platform.is_online());
        platform.set_online(false);
        assert!(!platform.is_online());
    }

    #[test]
    fn test_manual_desktop_has_no_lifecycle() {
        let platform = ManualPlatform::new();
        assert!(platform.lifecycle_events().is_none());
        assert_eq!(platform.emit(LifecycleEvent::Pause), 0);
    }

    #[tokio::test]
    async fn test_manual_mobile_delivers_events() {
        let platform = ManualPlatform::mobile();
        let mut rx = platform.lifecycle_events().unwrap();
        assert_eq!(platform.listener_count(), 1);

        assert_eq!(platform.emit(LifecycleEvent::Resign), 1);
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Resign);
    }

    #[test]
    fn test_lifecycle_event_display() {
        assert_eq!(LifecycleEvent::Pause.to_string(), "pause");
        assert_eq!(LifecycleEvent::Resign.to_string(), "resign");
        assert_eq!(LifecycleEvent::Resume.to_string(), "resume");
    }
}
