//! Error types for Billboard Core

use std::fmt;

use thiserror::Error;

/// Which uniqueness constraint rejected a claim at commit time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The slot already has a claim
    Slot,
    /// The claimant already holds a claim (non-privileged cap)
    Claimant,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Slot => write!(f, "slot already claimed"),
            ConflictKind::Claimant => write!(f, "claimant already holds a claim"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
