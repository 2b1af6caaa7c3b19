//! Wall clock for the controller. Seeded from the host at startup and
//! overridable from the web form, since the device has no dependable time
//! source of its own.

use std::sync::Arc;
use time::macros::date;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::schedule::TimeOfDay;

/// Calendar date applied whenever the time is set by hand.
pub const OVERRIDE_DATE: Date = date!(2025 - 03 - 18);

pub type SharedClock = Arc<RwLock<SystemClock>>;

#[derive(Debug, Clone)]
pub struct SystemClock {
    base: PrimitiveDateTime,
    anchor: Instant,
    overridden: bool,
}

impl SystemClock {
    /// Start from the host's local time, falling back to UTC when the local
    /// offset cannot be determined.
    pub fn from_host() -> Self {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self::starting_at(PrimitiveDateTime::new(now.date(), now.time()))
    }

    pub fn starting_at(base: PrimitiveDateTime) -> Self {
        Self {
            base,
            anchor: Instant::now(),
            overridden: false,
        }
    }

    pub fn now(&self) -> PrimitiveDateTime {
        self.base + self.anchor.elapsed()
    }

    pub fn time_of_day(&self) -> TimeOfDay {
        self.now().time().into()
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    /// Pin the clock to `OVERRIDE_DATE` at `tod`, seconds zeroed.
    pub fn set_time_of_day(&mut self, tod: TimeOfDay) {
        let time = Time::from_hms(tod.hour(), tod.minute(), 0).unwrap_or(Time::MIDNIGHT);
        self.base = PrimitiveDateTime::new(OVERRIDE_DATE, time);
        self.anchor = Instant::now();
        self.overridden = true;
    }
}

pub fn shared(clock: SystemClock) -> SharedClock {
    Arc::new(RwLock::new(clock))
}

// ===========================================================================
// Tests
// ===========================================================================
