//! Change-stream events emitted by the ledger

use serde::{Deserialize, Serialize};

use super::Claim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Delete,
}

/// `{kind: "INSERT"|"DELETE", record: Claim}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Claim,
}

impl ChangeEvent {
    pub fn insert(record: Claim) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
        }
    }

    pub fn delete(record: Claim) -> Self {
        Self {
            kind: ChangeKind::Delete,
            record,
        }
    }
}
