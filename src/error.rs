// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for store replication.
//!
//! Errors are split in two layers:
//!
//! - [`StoreError`] is what a [`LocalStore`](crate::store::LocalStore)
//!   reports when its replication against the remote endpoint fails.
//! - [`ReplicationError`] is what the manager surfaces to its owner, either
//!   through a returned `Result` or through the `on_error` callback.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Task` | Depends on store error | One doctype's replication failed |
//! | `Cancelled` | No | The round was cancelled before it settled |
//! | `Config` | No | Invalid construction input |
//! | `UnknownDoctype` | No | Doctype was not configured |
//! | `StoreDestroy` | No | A store failed to destroy itself |
//! | `Destroyed` | No | Manager has been destroyed |
//! | `Internal` | No | Unexpected internal error |
//!
//! Connectivity loss (device offline) is **not** an error: scheduled ticks
//! are silently skipped. Nothing is retried automatically; a failed round
//! stops the scheduler until the owner starts it again.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Broad classification of a store replication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Remote endpoint unreachable.
    Connection,
    /// Remote endpoint rejected our credentials.
    Unauthorized,
    /// Connection dropped or protocol error mid-replication.
    Transport,
    /// Store engine failed to reconcile documents.
    Conflict,
    /// Store has been destroyed or closed.
    Closed,
    /// Anything else.
    Other,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreErrorKind::Connection => write!(f, "connection"),
            StoreErrorKind::Unauthorized => write!(f, "unauthorized"),
            StoreErrorKind::Transport => write!(f, "transport"),
            StoreErrorKind::Conflict => write!(f, "conflict"),
            StoreErrorKind::Closed => write!(f, "closed"),
            StoreErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Failure reported by a local store's replication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unauthorized, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transport, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Closed, message)
    }

    /// Whether a later round could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Connection | StoreErrorKind::Transport
        )
    }
}

/// Errors surfaced by the sync manager.
///
/// `Clone` so a single round failure can be handed to the `on_error`
/// callback and to every waiter on the round.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// A single doctype's replication failed, failing the whole round.
    #[error("Replication of {doctype} failed: {source}")]
    Task {
        doctype: String,
        #[source]
        source: StoreError,
    },

    /// The round was cancelled before it settled.
    #[error("Replication cancelled")]
    Cancelled,

    /// Invalid construction input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The doctype has no store in this manager.
    #[error("Unknown doctype: {0}")]
    UnknownDoctype(String),

    /// A store failed to destroy itself.
    #[error("Destroying store for {doctype} failed: {source}")]
    StoreDestroy {
        doctype: String,
        #[source]
        source: StoreError,
    },

    /// The manager was destroyed; its stores are gone.
    #[error("Sync manager destroyed")]
    Destroyed,

    /// Unexpected internal error (task panicked, channel dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a task error for a doctype.
    pub fn task(doctype: impl Into<String>, source: StoreError) -> Self {
        Self::Task {
            doctype: doctype.into(),
            source,
        }
    }

    /// The doctype whose task failed, if this is a task error.
    pub fn doctype(&self) -> Option<&str> {
        match self {
            Self::Task { doctype, .. } | Self::StoreDestroy { doctype, .. } => Some(doctype),
            _ => None,
        }
    }

    /// Check if restarting replication could succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Task { source, .. } => source.is_transient(),
            Self::Cancelled => false,
            Self::Config(_) => false,
            Self::UnknownDoctype(_) => false,
            Self::StoreDestroy { .. } => false,
            Self::Destroyed => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_formatting() {
        let err = ReplicationError::task("io.cozy.todos", StoreError::connection("ECONNREFUSED"));
        let msg = err.to_string();
        assert!(msg.contains("io.cozy.todos"));
        assert!(msg.contains("connection"));
        assert!(msg.contains("ECONNREFUSED"));
        assert_eq!(err.doctype(), Some("io.cozy.todos"));
    }

    #[test]
    fn test_task_retryable_follows_store_error() {
        let transient = ReplicationError::task("todos", StoreError::transport("reset"));
        assert!(transient.is_retryable());

        let auth = ReplicationError::task("todos", StoreError::unauthorized("expired token"));
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_not_retryable_others() {
        assert!(!ReplicationError::Cancelled.is_retryable());
        assert!(!ReplicationError::Config("dup".into()).is_retryable());
        assert!(!ReplicationError::UnknownDoctype("x".into()).is_retryable());
        assert!(!ReplicationError::Destroyed.is_retryable());
        assert!(!ReplicationError::Internal("panic".into()).is_retryable());
    }

    #[test]
    fn test_store_error_kind_display() {
        assert_eq!(StoreErrorKind::Conflict.to_string(), "conflict");
        let err = StoreError::new(StoreErrorKind::Other, "boom");
        assert_eq!(err.to_string(), "other error: boom");
    }

    #[test]
    fn test_errors_are_comparable() {
        let a = ReplicationError::task("contacts", StoreError::transport("E"));
        let b = a.clone();
        assert_eq!(a, b);
    }
}
