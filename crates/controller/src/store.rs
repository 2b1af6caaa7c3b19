//! Schedule persistence: one text line per zone row.
//!
//! ```text
//! row1, 7, 1, 7, 2, 1
//! row2, NULL, NULL, NULL, NULL, NULL
//! ```
//!
//! Columns are start hour, start minute, stop hour, stop minute and duration
//! in minutes. The whole file is rewritten on every save (temp file + rename).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::overlap;
use crate::schedule::{Schedule, ScheduleWindow, TimeOfDay, Zone};

const NULL_ROW: &str = "NULL, NULL, NULL, NULL, NULL";

#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the schedule. A missing or unreadable file is replaced with the
    /// built-in default; a bad row reads as unset without affecting the rest.
    pub async fn load(&self) -> Schedule {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8(bytes).ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no schedule file, creating default");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), "schedule file unreadable: {e}");
                None
            }
        };

        match contents.as_deref().and_then(parse) {
            Some(schedule) => {
                if overlap::has_overlap(&schedule.spans()) {
                    warn!(path = %self.path.display(), "stored schedule has overlapping windows");
                }
                schedule
            }
            None => {
                let schedule = Schedule::default();
                if let Err(e) = self.save(&schedule).await {
                    error!("failed to recreate schedule file: {e:#}");
                }
                schedule
            }
        }
    }

    /// Replace the file with all seven rows of `schedule`.
    pub async fn save(&self, schedule: &Schedule) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, render(schedule))
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Text format
// ---------------------------------------------------------------------------

pub fn render(schedule: &Schedule) -> String {
    let mut out = String::new();
    for (zone, window) in schedule.iter() {
        match window {
            Some(w) => out.push_str(&format!(
                "row{zone}, {}, {}, {}, {}, {}\n",
                w.start.hour(),
                w.start.minute(),
                w.stop.hour(),
                w.stop.minute(),
                w.duration_min
            )),
            None => out.push_str(&format!("row{zone}, {NULL_ROW}\n")),
        }
    }
    out
}

/// `None` when no line carries a recognisable row label, i.e. the file is
/// not a schedule at all.
fn parse(contents: &str) -> Option<Schedule> {
    let mut schedule = Schedule::empty();
    let mut recognised = 0;

    for line in contents.lines() {
        let mut parts = line.trim().split(',').map(str::trim);
        let Some(zone) = parts
            .next()
            .and_then(|label| label.strip_prefix("row"))
            .and_then(|n| n.parse().ok())
            .and_then(Zone::new)
        else {
            continue;
        };
        recognised += 1;

        let fields: Vec<&str> = parts.collect();
        match parse_row(&fields) {
            Ok(window) => schedule.set(zone, window),
            Err(e) => {
                warn!(zone = %zone, "bad schedule row, treating as NULL: {e:#}");
                schedule.set(zone, None);
            }
        }
    }

    (recognised > 0).then_some(schedule)
}

fn parse_row(fields: &[&str]) -> Result<Option<ScheduleWindow>> {
    if fields.len() == 5 && fields.iter().all(|f| *f == "NULL") {
        return Ok(None);
    }
    let [sh, sm, eh, em, dur] = fields else {
        anyhow::bail!("expected 5 fields, got {}", fields.len());
    };
    let num = |s: &str| s.parse::<u8>().with_context(|| format!("'{s}' is not a number"));
    let start = TimeOfDay::new(num(*sh)?, num(*sm)?).context("start out of range")?;
    let stop = TimeOfDay::new(num(*eh)?, num(*em)?).context("stop out of range")?;
    let duration_min = dur
        .parse()
        .with_context(|| format!("bad duration '{dur}'"))?;
    Ok(Some(ScheduleWindow {
        start,
        stop,
        duration_min,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================
