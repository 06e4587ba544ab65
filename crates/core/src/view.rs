//! Local ledger view
//!
//! A client's cache of the claim ledger. It is replaced wholesale by a
//! snapshot and patched by change events. Applying an event is idempotent
//! by record id, and a record id that has been deleted is never
//! resurrected by a late INSERT.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::models::{ChangeEvent, ChangeKind, Claim, SlotId, TOTAL_SLOTS};

#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    claims: HashMap<Uuid, Claim>,
    by_slot: HashMap<SlotId, Uuid>,
    /// Ids seen deleted; ids are never reused by the ledger
    tombstones: HashSet<Uuid>,
}

impl LedgerView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the view with an authoritative snapshot
    pub fn replace(&mut self, snapshot: Vec<Claim>) {
        crate::invariants::assert_snapshot_invariants(&snapshot);
        self.claims.clear();
        self.by_slot.clear();
        for claim in snapshot {
            self.tombstones.remove(&claim.id);
            self.insert(claim);
        }
        crate::invariants::assert_view_invariants(self);
    }

    /// Apply one change event; returns whether the view changed
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        let changed = match event.kind {
            ChangeKind::Insert => {
                if self.tombstones.contains(&event.record.id)
                    || self.claims.contains_key(&event.record.id)
                {
                    false
                } else {
                    self.insert(event.record.clone());
                    true
                }
            }
            ChangeKind::Delete => {
                self.tombstones.insert(event.record.id);
                self.remove(event.record.id).is_some()
            }
        };
        crate::invariants::assert_view_invariants(self);
        changed
    }

    fn insert(&mut self, claim: Claim) {
        // A newer claim for the same slot supersedes a stale local one
        if let Some(old) = self.by_slot.insert(claim.slot, claim.id) {
            if old != claim.id {
                self.claims.remove(&old);
            }
        }
        self.claims.insert(claim.id, claim);
    }

    fn remove(&mut self, id: Uuid) -> Option<Claim> {
        let claim = self.claims.remove(&id)?;
        if self.by_slot.get(&claim.slot) == Some(&id) {
            self.by_slot.remove(&claim.slot);
        }
        Some(claim)
    }

    pub fn claim_for_slot(&self, slot: SlotId) -> Option<&Claim> {
        self.by_slot.get(&slot).and_then(|id| self.claims.get(id))
    }

    pub fn is_booked(&self, slot: SlotId) -> bool {
        self.by_slot.contains_key(&slot)
    }

    pub fn get(&self, id: Uuid) -> Option<&Claim> {
        self.claims.get(&id)
    }

    /// Claims in slot order
    pub fn claims(&self) -> Vec<&Claim> {
        let mut claims: Vec<&Claim> = self.claims.values().collect();
        claims.sort_by_key(|c| c.slot);
        claims
    }

    pub fn booked_count(&self) -> usize {
        self.by_slot.len()
    }

    pub fn remaining(&self) -> usize {
        TOTAL_SLOTS.saturating_sub(self.booked_count())
    }

    /// Booked share of the grid, rounded to a whole percent
    pub fn capacity_percent(&self) -> u32 {
        ((self.booked_count() as f64 / TOTAL_SLOTS as f64) * 100.0).round() as u32
    }

    /// Number of claims held by an email (case-insensitive)
    pub fn count_for(&self, email: &str) -> usize {
        self.claims.values().filter(|c| c.is_held_by(email)).count()
    }

    pub(crate) fn slot_index_len(&self) -> usize {
        self.by_slot.len()
    }

    pub(crate) fn claim_len(&self) -> usize {
        self.claims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, Role};

    fn claim(slot: &str, email: &str) -> Claim {
        let who = Identity::new(email, "Venue", Role::User);
        Claim::new(slot.parse().unwrap(), &who, "Song".into())
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut view = LedgerView::new();
        let event = ChangeEvent::insert(claim("1-1", "a@x.com"));
        assert!(view.apply(&event));
        assert!(!view.apply(&event));
        assert_eq!(view.booked_count(), 1);
        assert_eq!(view.claims().len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut view = LedgerView::new();
        let c = claim("5-5", "a@x.com");
        view.apply(&ChangeEvent::insert(c.clone()));
        let delete = ChangeEvent::delete(c);
        assert!(view.apply(&delete));
        assert!(!view.apply(&delete));
        assert_eq!(view.booked_count(), 0);
    }

    #[test]
    fn test_delete_of_absent_is_noop() {
        let mut view = LedgerView::new();
        view.apply(&ChangeEvent::insert(claim("0-1", "a@x.com")));
        assert!(!view.apply(&ChangeEvent::delete(claim("0-2", "b@x.com"))));
        assert_eq!(view.booked_count(), 1);
    }

    #[test]
    fn test_late_insert_after_delete_is_ignored() {
        let mut view = LedgerView::new();
        let c = claim("2-2", "a@x.com");
        view.apply(&ChangeEvent::delete(c.clone()));
        assert!(!view.apply(&ChangeEvent::insert(c)));
        assert!(!view.is_booked("2-2".parse().unwrap()));
    }

    #[test]
    fn test_replace_discards_local_state() {
        let mut view = LedgerView::new();
        view.apply(&ChangeEvent::insert(claim("0-0", "a@x.com")));
        let winner = claim("0-0", "b@x.com");
        view.replace(vec![winner.clone(), claim("9-9", "admin@x.com")]);
        assert_eq!(view.booked_count(), 2);
        assert_eq!(view.claim_for_slot("0-0".parse().unwrap()), Some(&winner));
        assert_eq!(view.count_for("A@x.com"), 0);
        assert_eq!(view.count_for("b@x.com"), 1);
    }

    #[test]
    #[should_panic(expected = "two claims for slot")]
    fn test_snapshot_with_duplicate_slot_is_refused() {
        let mut view = LedgerView::new();
        view.replace(vec![claim("2-2", "a@x.com"), claim("2-2", "b@x.com")]);
    }

    #[test]
    fn test_derived_statistics() {
        let mut view = LedgerView::new();
        for slot in ["0-0", "0-1", "0-2"] {
            view.apply(&ChangeEvent::insert(claim(slot, "admin@x.com")));
        }
        assert_eq!(view.booked_count(), 3);
        assert_eq!(view.remaining(), 97);
        assert_eq!(view.capacity_percent(), 3);
        assert_eq!(view.count_for("ADMIN@x.com"), 3);
    }
}
