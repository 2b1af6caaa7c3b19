//! Time-triggered dispatch: starts a zone when the clock reads exactly the
//! start minute of its window.
//!
//! Matching is exact to the minute. If the loop is busy (typically with
//! another actuation) for the whole start minute, that row is skipped until
//! the next day; nothing is queued or caught up.

use tracing::{debug, info};

use crate::app::AppState;
use crate::schedule::{Schedule, TimeOfDay};
use crate::sequencer::ActuationRequest;
use crate::state::Trigger;

/// Requests for every row whose window starts at `now`, in zone order.
/// Each runs for the full stored duration.
pub fn due_requests(schedule: &Schedule, now: TimeOfDay) -> Vec<ActuationRequest> {
    schedule
        .iter()
        .filter_map(|(zone, w)| w.map(|w| (zone, w)))
        .filter(|(_, w)| w.start == now)
        .map(|(zone, w)| ActuationRequest::new(zone, w.duration_min as u32 * 60))
        .collect()
}

/// Compare the stored schedule with `now` and run whatever is due, one after
/// another. Returns how many requests were issued.
pub async fn check(app: &AppState, now: TimeOfDay) -> usize {
    let schedule = app.store.load().await;
    let due = due_requests(&schedule, now);
    debug!(%now, due = due.len(), "schedule check");

    for req in &due {
        info!(zone = %req.zone, secs = req.seconds, %now, "scheduled start");
        // Failures are already logged and recorded; later rows still run.
        let _ = app.actuate(*req, Trigger::Schedule).await;
    }
    due.len()
}

// ===========================================================================
// Tests
// ===========================================================================
