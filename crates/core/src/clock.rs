//! Booking window clock
//!
//! Derives the countdown and live flag from the authoritative window and an
//! absolute instant. Nothing here keeps a running counter; every reading is
//! recomputed from timestamps, so skipped ticks cost nothing.

use chrono::{DateTime, Utc};

use crate::models::BookingWindow;

/// Countdown seconds during which the near-open cue fires
pub const NEAR_OPEN_SECS: std::ops::RangeInclusive<u64> = 1..=3;

/// One clock evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockReading {
    pub is_live: bool,
    pub seconds_remaining: u64,
}

impl ClockReading {
    /// Evaluate the window at `now`
    pub fn at(window: &BookingWindow, now: DateTime<Utc>) -> Self {
        let Some(opens_at) = window.opens_at else {
            return Self::default();
        };

        let diff = opens_at - now;
        if diff <= chrono::Duration::zero() {
            let is_live = window.closes_at.map_or(true, |closes_at| now < closes_at);
            return Self {
                is_live,
                seconds_remaining: 0,
            };
        }

        Self {
            is_live: false,
            seconds_remaining: diff.num_seconds() as u64,
        }
    }

    /// Whether this tick should raise the near-open cue
    pub fn near_open(&self) -> bool {
        NEAR_OPEN_SECS.contains(&self.seconds_remaining)
    }
}
