// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync manager.
//!
//! [`ManagerConfig`] holds the plain-data settings and can be built in code
//! or deserialized from YAML/JSON. The callbacks and the remote URL provider
//! are not data; they live on [`ManagerOptions`](crate::manager::ManagerOptions).
//!
//! # YAML Example
//!
//! ```yaml
//! replication_delay: "30s"
//! batch_size: 1000
//! overlap_policy: skip_if_busy
//! lifecycle_enabled: true
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Period used when neither `start()` nor the config names one.
pub const DEFAULT_REPLICATION_DELAY: Duration = Duration::from_secs(30);

/// Documents are assumed small, so batches are large.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// What a scheduled tick does when the previous round is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Skip the tick; the running round keeps going.
    #[default]
    SkipIfBusy,
    /// Cancel the stale round, then start a fresh one.
    CancelAndRestart,
}

/// Plain-data settings for a [`SyncManager`](crate::SyncManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Replication period as a duration string (e.g., "30s", "2m").
    /// `None` means [`DEFAULT_REPLICATION_DELAY`].
    #[serde(default)]
    pub replication_delay: Option<String>,

    /// Batch size passed to every store replication.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tick behaviour while a round is still running.
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,

    /// Whether to follow device pause/resume signals on mobile platforms.
    #[serde(default = "default_true")]
    pub lifecycle_enabled: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            replication_delay: None,
            batch_size: DEFAULT_BATCH_SIZE,
            overlap_policy: OverlapPolicy::SkipIfBusy,
            lifecycle_enabled: true,
        }
    }
}

impl ManagerConfig {
    /// Short period and no lifecycle bridge.
    pub fn for_testing() -> Self {
        Self {
            replication_delay: Some("1s".to_string()),
            lifecycle_enabled: false,
            ..Default::default()
        }
    }

    /// Parse `replication_delay`, falling back to the default period.
    ///
    /// A zero or unparsable delay is rejected with a warning; a zero period
    /// would spin the scheduler.
    pub fn replication_delay_duration(&self) -> Duration {
        let Some(raw) = self.replication_delay.as_deref() else {
            return DEFAULT_REPLICATION_DELAY;
        };
        match humantime::parse_duration(raw) {
            Ok(delay) if !delay.is_zero() => delay,
            Ok(_) => {
                warn!(replication_delay = raw, "Zero replication delay, using default");
                DEFAULT_REPLICATION_DELAY
            }
            Err(e) => {
                warn!(replication_delay = raw, error = %e, "Invalid replication delay, using default");
                DEFAULT_REPLICATION_DELAY
            }
        }
    }

    /// Resolve the period for a `start()` call: explicit, then configured,
    /// then default.
    pub fn resolve_delay(&self, explicit: Option<Duration>) -> Duration {
        match explicit {
            Some(delay) if !delay.is_zero() => delay,
            _ => self.replication_delay_duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.replication_delay, None);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.overlap_policy, OverlapPolicy::SkipIfBusy);
        assert!(config.lifecycle_enabled);
        assert_eq!(config.replication_delay_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_various_formats() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("1m", Duration::from_secs(60)),
            ("500ms", Duration::from_millis(500)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let config = ManagerConfig {
                replication_delay: Some(input.to_string()),
                ..Default::default()
            };
            assert_eq!(config.replication_delay_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_delay_invalid_fallback() {
        let config = ManagerConfig {
            replication_delay: Some("soon".to_string()),
            ..Default::default()
        };
        assert_eq!(config.replication_delay_duration(), DEFAULT_REPLICATION_DELAY);

        let zero = ManagerConfig {
            replication_delay: Some("0s".to_string()),
            ..Default::default()
        };
        assert_eq!(zero.replication_delay_duration(), DEFAULT_REPLICATION_DELAY);
    }

    #[test]
    fn test_resolve_delay_precedence() {
        let config = ManagerConfig {
            replication_delay: Some("10s".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_delay(Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(config.resolve_delay(None), Duration::from_secs(10));
        assert_eq!(config.resolve_delay(Some(Duration::ZERO)), Duration::from_secs(10));
        assert_eq!(ManagerConfig::default().resolve_delay(None), Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_partial_json() {
        let parsed: ManagerConfig =
            serde_json::from_str(r#"{"overlap_policy": "cancel_and_restart"}"#).unwrap();
        assert_eq!(parsed.overlap_policy, OverlapPolicy::CancelAndRestart);
        assert_eq!(parsed.batch_size, 1000);
        assert!(parsed.lifecycle_enabled);
        assert_eq!(parsed.replication_delay, None);
    }

    #[test]
    fn test_for_testing_config() {
        let config = ManagerConfig::for_testing();
        assert!(!config.lifecycle_enabled);
        assert_eq!(config.replication_delay_duration(), Duration::from_secs(1));
    }
}
