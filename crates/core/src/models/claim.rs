//! Claim model - one successful booking of one slot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Identity, SlotId};

/// A committed claim as stored by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    #[serde(rename = "slot_id")]
    pub slot: SlotId,
    pub claimant_email: String,
    pub claimant_group: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl Claim {
    /// Build a claim for the given identity; the ledger assigns `id` and `created_at`
    pub fn new(slot: SlotId, claimant: &Identity, label: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            claimant_email: claimant.email.clone(),
            claimant_group: claimant.venue.clone(),
            label,
            created_at: Utc::now(),
        }
    }

    /// Whether this claim belongs to the given email (case-insensitive)
    pub fn is_held_by(&self, email: &str) -> bool {
        self.claimant_email.eq_ignore_ascii_case(email.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_claim_wire_shape() {
        let who = Identity::new("a@b.com", "Venue A", Role::User);
        let claim = Claim::new(SlotId::new(0, 0).unwrap(), &who, "Song 1".into());
        let json = serde_json::to_value(&claim).unwrap();
        assert_eq!(json["slot_id"], "0-0");
        assert_eq!(json["claimant_email"], "a@b.com");
        assert_eq!(json["claimant_group"], "Venue A");
        assert!(claim.is_held_by(" A@B.com "));
    }
}
