//! Actuator sequencer: runs one actuation request to completion.
//!
//! ```text
//! Idle ─▶ SelectZone ─▶ SettleDelay (2s) ─▶ PumpOn ─▶ Run (request) ─▶ PumpOff
//!   ▲                                                                    │
//!   └── ReturnDelay (1s) ◀── Deselect ◀── Cooldown (0.2s) ◀──────────────┘
//! ```
//!
//! The pump is never enabled before the selector has settled on a zone, and
//! every exit path (including output faults) ends with the pump off, the
//! selector at position 0 and both outputs released.

use anyhow::Result;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::board::{ActuatorBoard, ALL_OFF};
use crate::schedule::Zone;

/// Time for the selector arm to reach its commanded position.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Pause between pump off and deselect, avoids supply transients.
pub const COOLDOWN: Duration = Duration::from_millis(200);
/// Time for the arm to return before the outputs are released.
pub const RETURN_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationRequest {
    pub zone: Zone,
    pub seconds: u32,
}

impl ActuationRequest {
    pub fn new(zone: Zone, seconds: u32) -> Self {
        Self { zone, seconds }
    }

    pub fn run_time(&self) -> Duration {
        Duration::from_secs(self.seconds as u64)
    }
}

impl fmt::Display for ActuationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {} for {}s", self.zone, self.seconds)
    }
}

// ---------------------------------------------------------------------------
// Stage machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    SelectZone,
    SettleDelay,
    PumpOn,
    Run,
    PumpOff,
    Cooldown,
    Deselect,
    ReturnDelay,
}

pub struct Sequencer {
    board: ActuatorBoard,
    stage: Stage,
}

impl Sequencer {
    pub(crate) fn new(board: ActuatorBoard) -> Self {
        Self {
            board,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[cfg(test)]
    pub(crate) fn board(&self) -> &ActuatorBoard {
        &self.board
    }

    #[cfg(test)]
    pub(crate) fn board_mut(&mut self) -> &mut ActuatorBoard {
        &mut self.board
    }

    /// Execute `req`, blocking the caller for its full duration.
    pub async fn run(&mut self, req: ActuationRequest) -> Result<()> {
        info!(zone = %req.zone, secs = req.seconds, "actuation started");
        let outcome = match self.board.claim() {
            Ok(()) => self.drive(&req).await,
            Err(e) => Err(e.context("failed to claim outputs")),
        };

        if let Err(e) = &outcome {
            error!(zone = %req.zone, "{e:#}");
            self.force_off().await;
        }
        self.board.release();
        self.stage = Stage::Idle;

        if outcome.is_ok() {
            info!(zone = %req.zone, secs = req.seconds, "actuation finished");
        }
        outcome
    }

    async fn drive(&mut self, req: &ActuationRequest) -> Result<()> {
        let mut stage = Stage::SelectZone;
        loop {
            match self.step(stage, req).await {
                Ok(Stage::Idle) => return Ok(()),
                Ok(next) => stage = next,
                Err(e) => return Err(e.context(format!("actuation failed in {stage:?}"))),
            }
        }
    }

    /// Perform `stage` and return the one that follows it.
    async fn step(&mut self, stage: Stage, req: &ActuationRequest) -> Result<Stage> {
        self.stage = stage;
        debug!(?stage, "sequencer");
        let next = match stage {
            Stage::Idle => Stage::Idle,
            Stage::SelectZone => {
                self.board.select(req.zone.get())?;
                Stage::SettleDelay
            }
            Stage::SettleDelay => {
                sleep(SETTLE_DELAY).await;
                Stage::PumpOn
            }
            Stage::PumpOn => {
                self.board.set_pump(true)?;
                Stage::Run
            }
            Stage::Run => {
                sleep(req.run_time()).await;
                Stage::PumpOff
            }
            Stage::PumpOff => {
                self.board.set_pump(false)?;
                Stage::Cooldown
            }
            Stage::Cooldown => {
                sleep(COOLDOWN).await;
                Stage::Deselect
            }
            Stage::Deselect => {
                self.board.select(ALL_OFF)?;
                Stage::ReturnDelay
            }
            Stage::ReturnDelay => {
                sleep(RETURN_DELAY).await;
                Stage::Idle
            }
        };
        Ok(next)
    }

    /// Best-effort shutdown after a fault, keeping the normal cooldown and
    /// return delays so the selector is back at rest before release.
    async fn force_off(&mut self) {
        warn!(stage = ?self.stage, "forcing outputs off");
        if let Err(e) = self.board.set_pump(false) {
            warn!("fail-safe pump off failed: {e:#}");
        }
        self.stage = Stage::Cooldown;
        sleep(COOLDOWN).await;
        if let Err(e) = self.board.select(ALL_OFF) {
            warn!("fail-safe deselect failed: {e:#}");
        }
        self.stage = Stage::ReturnDelay;
        sleep(RETURN_DELAY).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
