//! One-line status rendering for the live view

use billboard_core::{ClockReading, WindowPhase};

use crate::session::SessionStats;

/// Render a status line from the window phase, a clock reading and session figures
pub fn render(
    phase: WindowPhase,
    reading: &ClockReading,
    stats: &SessionStats,
    synced: bool,
) -> String {
    let clock = match phase {
        WindowPhase::NeverOpened => "not scheduled".to_string(),
        WindowPhase::Pending if reading.seconds_remaining > 0 => {
            format!("opens in {}s", reading.seconds_remaining)
        }
        WindowPhase::Pending => "opening".to_string(),
        WindowPhase::Live => "LIVE".to_string(),
        WindowPhase::Closed => "closed".to_string(),
    };

    let mut line = format!(
        "[{}] {}/{} booked ({}%), {} left, mine: {}",
        clock,
        stats.booked,
        stats.booked + stats.remaining,
        stats.capacity_percent,
        stats.remaining,
        stats.my_claims,
    );
    if !stats.selection_label.is_empty() {
        line.push_str(&format!(", selected {}", stats.selection_label));
    }
    if !synced {
        line.push_str(" (stale)");
    }
    line
}
