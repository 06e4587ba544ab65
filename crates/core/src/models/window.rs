//! Booking window - the singleton time box during which claims are accepted

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Id of the singleton window row
pub const WINDOW_ID: i64 = 1;

/// Where `now` falls relative to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// `opens_at` is unset
    NeverOpened,
    /// `now < opens_at`
    Pending,
    Live,
    /// `closes_at` is set and `now >= closes_at`
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookingWindow {
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
}

impl BookingWindow {
    pub fn new(opens_at: Option<DateTime<Utc>>, closes_at: Option<DateTime<Utc>>) -> Self {
        Self {
            opens_at,
            closes_at,
        }
    }

    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        let Some(opens_at) = self.opens_at else {
            return WindowPhase::NeverOpened;
        };
        if now < opens_at {
            return WindowPhase::Pending;
        }
        match self.closes_at {
            Some(closes_at) if now >= closes_at => WindowPhase::Closed,
            _ => WindowPhase::Live,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == WindowPhase::Live
    }

    /// Re-open: new `opens_at`, `closes_at` cleared
    pub fn reopened(opens_at: DateTime<Utc>) -> Self {
        Self {
            opens_at: Some(opens_at),
            closes_at: None,
        }
    }

    /// Countdown start: opens `delay` after `now`
    pub fn opening_in(now: DateTime<Utc>, delay: Duration) -> Self {
        Self::reopened(now + delay)
    }

    /// Same window with `closes_at` set
    pub fn closed_at(self, closes_at: DateTime<Utc>) -> Self {
        Self {
            closes_at: Some(closes_at),
            ..self
        }
    }
}
