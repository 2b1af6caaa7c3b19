//! Rejects schedules in which two zones would run at the same time.

use crate::schedule::{Schedule, Zone};

/// Half-open spans `[start, stop)` in minutes since midnight.
/// Touching endpoints do not overlap.
fn intersects((a_start, a_stop): (u16, u16), (b_start, b_stop): (u16, u16)) -> bool {
    a_start < b_stop && b_start < a_stop
}

/// True if any two distinct spans intersect.
pub fn has_overlap(windows: &[(u16, u16)]) -> bool {
    windows.iter().enumerate().any(|(i, &a)| {
        windows[i + 1..].iter().any(|&b| intersects(a, b))
    })
}

/// First pair of zones whose windows intersect. Unset rows are skipped.
pub fn find_overlap(schedule: &Schedule) -> Option<(Zone, Zone)> {
    let set: Vec<_> = schedule
        .iter()
        .filter_map(|(zone, w)| w.map(|w| (zone, w.span())))
        .collect();

    for (i, &(zone_a, a)) in set.iter().enumerate() {
        for &(zone_b, b) in &set[i + 1..] {
            if intersects(a, b) {
                return Some((zone_a, zone_b));
            }
        }
    }
    None
}

// ===========================================================================
// Tests
// ===========================================================================
