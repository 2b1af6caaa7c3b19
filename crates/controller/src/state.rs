use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::schedule::{WindowView, Zone};
use crate::sequencer::ActuationRequest;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub last_run: Option<RunRecord>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct RunRecord {
    pub zone: Zone,
    pub seconds: u32,
    pub trigger: Trigger,
    pub ok: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Schedule,
    Manual,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Actuation,
    Schedule,
    Clock,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub clock: String,
    pub clock_overridden: bool,
    pub schedule: Vec<WindowView>,
    pub last_run: Option<RunRecord>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_run: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record the outcome of a finished actuation.
    pub fn record_run(&mut self, req: &ActuationRequest, trigger: Trigger, ok: bool) {
        self.last_run = Some(RunRecord {
            zone: req.zone,
            seconds: req.seconds,
            trigger,
            ok,
            finished_at: OffsetDateTime::now_utc(),
        });
        let outcome = if ok { "finished" } else { "failed" };
        let source = match trigger {
            Trigger::Schedule => "scheduled",
            Trigger::Manual => "manual",
        };
        self.push_event(EventKind::Actuation, format!("{source} run {req} {outcome}"));
    }

    pub fn record_schedule(&mut self, detail: String) {
        self.push_event(EventKind::Schedule, detail);
    }

    pub fn record_clock(&mut self, detail: String) {
        self.push_event(EventKind::Clock, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(
        &self,
        clock: String,
        clock_overridden: bool,
        schedule: Vec<WindowView>,
    ) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            clock,
            clock_overridden,
            schedule,
            last_run: self.last_run.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_capped() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 10) {
            st.record_system(format!("e{i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "e10");
    }

    #[test]
    fn record_run_sets_last_run_and_logs() {
        let mut st = SystemState::new();
        let req = ActuationRequest::new(Zone::new(2).unwrap(), 30);
        st.record_run(&req, Trigger::Manual, true);

        let last = st.last_run.as_ref().unwrap();
        assert_eq!(last.zone, req.zone);
        assert!(last.ok);
        assert!(matches!(st.events.back().unwrap().kind, EventKind::Actuation));
        assert_eq!(
            st.events.back().unwrap().detail,
            "manual run zone 2 for 30s finished"
        );
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = SystemState::new();
        st.record_system("first".into());
        st.record_error("second".into());

        let status = st.to_status("07:00:00".into(), false, Vec::new());
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }
}
