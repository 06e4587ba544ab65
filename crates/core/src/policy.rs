//! Booking policy
//!
//! The local, advisory half of a claim attempt. A request that passes here
//! may still lose at commit time; the ledger's uniqueness constraints are
//! the only authority under concurrency.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::{BookingWindow, Identity, SlotId, WindowPhase};
use crate::view::LedgerView;

/// Per-claimant cap for non-privileged claimants
pub const CLAIMS_PER_CLAIMANT: usize = 1;

/// Why a claim attempt ended without a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooEarly,
    Closed,
    InvalidSelectionSize,
    AlreadyBooked,
    QuotaExceeded,
    LostRace,
    TransientFailure,
    RequestInProgress,
    NotAuthorized,
}

impl Rejection {
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::TooEarly => "too early",
            Rejection::Closed => "closed",
            Rejection::InvalidSelectionSize => "invalid selection size",
            Rejection::AlreadyBooked => "already booked",
            Rejection::QuotaExceeded => "quota exceeded",
            Rejection::LostRace => "lost race",
            Rejection::TransientFailure => "transient failure",
            Rejection::RequestInProgress => "request already in progress",
            Rejection::NotAuthorized => "not authorized",
        }
    }

}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Everything the policy looks at
pub struct BookingRequest<'a> {
    pub claimant: &'a Identity,
    pub window: &'a BookingWindow,
    pub view: &'a LedgerView,
    pub selection: &'a [SlotId],
    pub now: DateTime<Utc>,
}

/// Run the checks in order; the first failing one wins.
///
/// Only a set `opens_at` in the future is "too early"; an unset one gates
/// nothing, though a set `closes_at` still closes the window.
pub fn validate(request: &BookingRequest<'_>) -> Result<SlotId, Rejection> {
    match request.window.phase(request.now) {
        WindowPhase::Pending => return Err(Rejection::TooEarly),
        WindowPhase::Closed => return Err(Rejection::Closed),
        WindowPhase::NeverOpened => {
            if matches!(request.window.closes_at, Some(closes_at) if request.now >= closes_at) {
                return Err(Rejection::Closed);
            }
        }
        WindowPhase::Live => {}
    }

    let [slot] = request.selection else {
        return Err(Rejection::InvalidSelectionSize);
    };

    if request.view.is_booked(*slot) {
        return Err(Rejection::AlreadyBooked);
    }

    if !request.claimant.is_privileged()
        && request.view.count_for(&request.claimant.email) >= CLAIMS_PER_CLAIMANT
    {
        return Err(Rejection::QuotaExceeded);
    }

    Ok(*slot)
}
