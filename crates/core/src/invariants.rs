//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashSet;

use crate::models::{BookingWindow, Claim};
use crate::view::LedgerView;

/// Validate that a local view never holds two claims for one slot
pub fn assert_view_invariants(view: &LedgerView) {
    debug_assert_eq!(
        view.slot_index_len(),
        view.claim_len(),
        "Ledger view slot index ({}) out of step with claims ({})",
        view.slot_index_len(),
        view.claim_len()
    );
}

/// Validate that a ledger snapshot respects slot uniqueness
pub fn assert_snapshot_invariants(claims: &[Claim]) {
    let mut slots = HashSet::new();
    for claim in claims {
        debug_assert!(
            slots.insert(claim.slot),
            "Snapshot has two claims for slot {}",
            claim.slot
        );
        debug_assert!(
            !claim.claimant_email.trim().is_empty(),
            "Claim {} has empty claimant",
            claim.id
        );
    }
}

/// Validate that a window never closes before it opens
pub fn assert_window_invariants(window: &BookingWindow) {
    if let (Some(opens_at), Some(closes_at)) = (window.opens_at, window.closes_at) {
        debug_assert!(
            closes_at >= opens_at || closes_at <= chrono::Utc::now(),
            "Window closes at {} before it opens at {}",
            closes_at,
            opens_at
        );
    }
}
