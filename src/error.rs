//! Structured error types for the outliner engine using thiserror.
//!
//! # Error Conversion
//! Lower-level errors (`rusqlite`, `std::io`) convert into `OutlinerError`
//! via `From` so call sites can use `?` directly; nothing downstream ever
//! has to match on a foreign error type.

use std::io;
use thiserror::Error;

/// The kind of entity named by a `NotFound` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Page,
    Block,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Page => write!(f, "page"),
            EntityKind::Block => write!(f, "block"),
        }
    }
}

/// Main error type for outliner engine operations.
#[derive(Error, Debug)]
pub enum OutlinerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid parent: {reason}")]
    InvalidParent { reason: String },

    #[error("cannot indent block {block_id}: no previous sibling")]
    NoPreviousSibling { block_id: String },

    #[error("cannot outdent block {block_id}: already at page root")]
    AlreadyAtRoot { block_id: String },

    #[error("fractional index precision exhausted for page {page_id}")]
    PrecisionExhausted { page_id: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("moving block {block_id} under {target_parent_id} would create a cycle")]
    CycleDetected {
        block_id: String,
        target_parent_id: String,
    },

    #[error("I/O error: {0}")]
    IoFailure(#[from] io::Error),

    #[error("database error: {0}")]
    Database(String),
}

impl OutlinerError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        OutlinerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_parent(reason: impl Into<String>) -> Self {
        OutlinerError::InvalidParent {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        OutlinerError::Conflict {
            reason: reason.into(),
        }
    }
}

/// Result type alias for outliner engine operations.
pub type Result<T> = std::result::Result<T, OutlinerError>;

impl From<rusqlite::Error> for OutlinerError {
    fn from(err: rusqlite::Error) -> Self {
        OutlinerError::Database(err.to_string())
    }
}
