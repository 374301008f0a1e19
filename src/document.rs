// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Changed documents and per-task change accumulation.
//!
//! Documents arrive from a store replication in change batches. Only
//! application-visible documents are kept: design documents and deleted
//! documents never reach the owner. Within one task the latest version of a
//! document wins, while the position of the first arrival is kept.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Id prefix of internal design documents.
pub const DESIGN_PREFIX: &str = "_design";

/// A replicated document.
///
/// Wire field names follow the store engine (`_id`, `_rev`, `_deleted`);
/// every other field is kept as-is in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Document {
    /// Create a live document with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            fields: serde_json::Map::new(),
        }
    }

    /// Create a deletion marker.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            deleted: true,
            ..Self::new(id)
        }
    }

    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Internal/meta document (index definitions and the like).
    pub fn is_design(&self) -> bool {
        self.id.starts_with(DESIGN_PREFIX)
    }

    /// Marked deleted upstream.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Should this document appear in a change set.
    pub fn is_visible(&self) -> bool {
        !self.is_design() && !self.is_deleted()
    }
}

/// Id-keyed accumulator for one task's change stream.
#[derive(Debug, Default)]
pub struct ChangeAccumulator {
    /// Position of each id in `docs`.
    index: HashMap<String, usize>,
    docs: Vec<Document>,
    /// Documents dropped as design or deleted.
    filtered: usize,
}

impl ChangeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one change batch. Returns how many documents were kept.
    pub fn apply<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Document>,
    {
        let mut kept = 0;
        for doc in batch {
            if !doc.is_visible() {
                self.filtered += 1;
                continue;
            }
            kept += 1;
            match self.index.get(&doc.id) {
                Some(&pos) => self.docs[pos] = doc,
                None => {
                    self.index.insert(doc.id.clone(), self.docs.len());
                    self.docs.push(doc);
                }
            }
        }
        kept
    }

    /// Number of distinct documents held.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of design/deleted documents dropped so far.
    pub fn filtered(&self) -> usize {
        self.filtered
    }

    /// Consume into the final change set.
    pub fn into_docs(self) -> Vec<Document> {
        self.docs
    }
}
