//! Identity model - who is claiming

use serde::{Deserialize, Serialize};

/// Claimant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    /// Privileged claimants skip the per-claimant cap and may release claims
    pub fn is_privileged(self) -> bool {
        self == Role::Admin
    }
}

/// A resolved identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    /// Claimant group
    pub venue: String,
    pub role: Role,
}

impl Identity {
    pub fn new(email: impl Into<String>, venue: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            venue: venue.into(),
            role,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    /// Key under which the per-claimant cap is enforced; `None` for privileged claimants
    pub fn quota_key(&self) -> Option<String> {
        if self.is_privileged() {
            None
        } else {
            Some(self.email.trim().to_lowercase())
        }
    }
}
