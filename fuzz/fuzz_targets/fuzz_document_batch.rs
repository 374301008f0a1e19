//! Fuzz target for change batch handling.
//!
//! Decodes arbitrary bytes as a JSON change batch and feeds it through the
//! accumulator. Must never panic, and the result must never contain a
//! design or deleted document, nor the same id twice.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;
use store_replication::{ChangeAccumulator, Document};

fuzz_target!(|data: &[u8]| {
    let Ok(batch) = serde_json::from_slice::<Vec<Document>>(data) else {
        return;
    };

    let mut acc = ChangeAccumulator::new();
    // Apply twice so every id is overwritten at least once.
    acc.apply(batch.clone());
    acc.apply(batch);

    let docs = acc.into_docs();
    let mut ids = HashSet::new();
    for doc in &docs {
        assert!(doc.is_visible());
        assert!(ids.insert(doc.id.as_str()));
    }
});
