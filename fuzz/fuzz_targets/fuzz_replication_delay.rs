//! Fuzz target for replication delay parsing.
//!
//! Any configured string must resolve to a usable (non-zero) period.

#![no_main]

use libfuzzer_sys::fuzz_target;
use store_replication::ManagerConfig;

fuzz_target!(|raw: &str| {
    let config = ManagerConfig {
        replication_delay: Some(raw.to_string()),
        ..Default::default()
    };
    assert!(!config.replication_delay_duration().is_zero());
    assert!(!config.resolve_delay(None).is_zero());
});
