//! Weekly schedule model: seven fixed zone slots, each optionally holding a
//! start/stop window measured in whole minutes.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::form::WindowFields;

/// Number of addressable zones. Zone 0 is reserved for "all zones off".
pub const ZONE_COUNT: usize = 7;

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

/// A valid zone identifier in `1..=ZONE_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Zone(u8);

impl Zone {
    pub fn new(id: u8) -> Option<Self> {
        (1..=ZONE_COUNT as u8).contains(&id).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Zone> {
        (1..=ZONE_COUNT as u8).map(Zone)
    }

    fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Zone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: u8 = s
            .trim()
            .parse()
            .with_context(|| format!("zone '{s}' is not a number"))?;
        Zone::new(id).with_context(|| format!("zone {id} out of range 1-{ZONE_COUNT}"))
    }
}

// ---------------------------------------------------------------------------
// TimeOfDay
// ---------------------------------------------------------------------------

/// Hour/minute pair. Equality is exact; ordering follows minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

impl From<time::Time> for TimeOfDay {
    fn from(t: time::Time) -> Self {
        Self {
            hour: t.hour(),
            minute: t.minute(),
        }
    }
}

/// Parses `HH:MM` (one or two digit components).
impl FromStr for TimeOfDay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((h, m)) = s.trim().split_once(':') else {
            bail!("time '{s}' is not in HH:MM form");
        };
        let hour: u8 = h.parse().with_context(|| format!("bad hour in '{s}'"))?;
        let minute: u8 = m.parse().with_context(|| format!("bad minute in '{s}'"))?;
        TimeOfDay::new(hour, minute).with_context(|| format!("time '{s}' out of range"))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// ---------------------------------------------------------------------------
// ScheduleWindow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: TimeOfDay,
    pub stop: TimeOfDay,
    /// Stored as written; never re-derived from `start`/`stop` on read.
    pub duration_min: u16,
}

impl ScheduleWindow {
    /// Builds a window, computing the duration. `None` if `stop` precedes `start`.
    pub fn new(start: TimeOfDay, stop: TimeOfDay) -> Option<Self> {
        let duration_min = stop
            .minutes_since_midnight()
            .checked_sub(start.minutes_since_midnight())?;
        Some(Self {
            start,
            stop,
            duration_min,
        })
    }

    /// Half-open `[start, stop)` span in minutes since midnight.
    pub fn span(&self) -> (u16, u16) {
        (
            self.start.minutes_since_midnight(),
            self.stop.minutes_since_midnight(),
        )
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    rows: [Option<ScheduleWindow>; ZONE_COUNT],
}

/// One row of the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WindowView {
    pub zone: Zone,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub duration_min: Option<u16>,
}

impl Schedule {
    /// A schedule with every row unset.
    pub fn empty() -> Self {
        Self {
            rows: [None; ZONE_COUNT],
        }
    }

    pub fn window(&self, zone: Zone) -> Option<&ScheduleWindow> {
        self.rows[zone.index()].as_ref()
    }

    pub fn set(&mut self, zone: Zone, window: Option<ScheduleWindow>) {
        self.rows[zone.index()] = window;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Zone, Option<&ScheduleWindow>)> {
        Zone::all().zip(self.rows.iter().map(Option::as_ref))
    }

    /// Spans of every set row, in zone order.
    pub fn spans(&self) -> Vec<(u16, u16)> {
        self.rows.iter().flatten().map(ScheduleWindow::span).collect()
    }

    /// Builds a schedule from submitted form fields. A row becomes unset when
    /// either field is missing, unparseable, or the window runs backwards;
    /// the other rows are unaffected.
    pub fn from_form(fields: &[WindowFields; ZONE_COUNT]) -> Self {
        let mut schedule = Schedule::empty();
        for (zone, f) in Zone::all().zip(fields.iter()) {
            let (Some(start), Some(stop)) = (f.start.as_deref(), f.stop.as_deref()) else {
                continue;
            };
            let window = match (start.parse::<TimeOfDay>(), stop.parse::<TimeOfDay>()) {
                (Ok(start), Ok(stop)) => ScheduleWindow::new(start, stop),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(zone = %zone, "unparseable window, storing NULL: {e:#}");
                    continue;
                }
            };
            if window.is_none() {
                tracing::warn!(zone = %zone, %start, %stop, "stop precedes start, storing NULL");
            }
            schedule.set(zone, window);
        }
        schedule
    }

    pub fn to_view(&self) -> Vec<WindowView> {
        self.iter()
            .map(|(zone, w)| WindowView {
                zone,
                start: w.map(|w| w.start.to_string()),
                stop: w.map(|w| w.stop.to_string()),
                duration_min: w.map(|w| w.duration_min),
            })
            .collect()
    }
}

/// Staggered one-minute windows at 07:01, 07:03, ... 07:13.
impl Default for Schedule {
    fn default() -> Self {
        let mut schedule = Schedule::empty();
        for zone in Zone::all() {
            let start_min = zone.get() * 2 - 1;
            let start = TimeOfDay { hour: 7, minute: start_min };
            let stop = TimeOfDay { hour: 7, minute: start_min + 1 };
            schedule.set(zone, ScheduleWindow::new(start, stop));
        }
        schedule
    }
}

// ===========================================================================
// Tests
// ===========================================================================
