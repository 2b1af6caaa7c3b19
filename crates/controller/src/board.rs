//! Actuator outputs: a servo-driven zone selector and the pump. The `gpio`
//! feature gates the real rppal driver; without it, a mock records every
//! output change so the sequencing can be inspected.
//!
//! Outputs are only held between `claim()` and `release()`; outside an
//! actuation the pins belong to nobody.

use anyhow::{Context, Result};

use crate::config::ActuatorConfig;

/// Selector position that closes every zone.
pub const ALL_OFF: u8 = 0;

// ---------------------------------------------------------------------------
// Real GPIO board (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};
#[cfg(feature = "gpio")]
use std::time::Duration;

#[cfg(feature = "gpio")]
struct Outputs {
    selector: OutputPin,
    pump: OutputPin,
}

#[cfg(feature = "gpio")]
pub(crate) struct ActuatorBoard {
    cfg: ActuatorConfig,
    outputs: Option<Outputs>,
}

#[cfg(feature = "gpio")]
impl ActuatorBoard {
    pub(crate) fn new(cfg: &ActuatorConfig) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            outputs: None,
        })
    }

    pub(crate) fn claim(&mut self) -> Result<()> {
        let gpio = Gpio::new().context("failed to open gpio")?;
        let selector = gpio
            .get(self.cfg.selector_gpio)
            .with_context(|| format!("selector gpio {}", self.cfg.selector_gpio))?
            .into_output_low();
        let pump = gpio
            .get(self.cfg.pump_gpio)
            .with_context(|| format!("pump gpio {}", self.cfg.pump_gpio))?
            .into_output();
        self.outputs = Some(Outputs { selector, pump });

        self.set_pump(false)?;
        self.select(ALL_OFF)
    }

    pub(crate) fn select(&mut self, position: u8) -> Result<()> {
        let pulse_ns = self.cfg.pulse_ns(position)?;
        let period = Duration::from_micros(self.cfg.selector_period_us);
        let outputs = self.outputs.as_mut().context("selector not claimed")?;
        outputs
            .selector
            .set_pwm(period, Duration::from_nanos(pulse_ns))
            .context("failed to drive selector pwm")?;
        tracing::debug!(position, pulse_ns, "selector moved");
        Ok(())
    }

    pub(crate) fn set_pump(&mut self, on: bool) -> Result<()> {
        let active_low = self.cfg.pump_active_low;
        let outputs = self.outputs.as_mut().context("pump not claimed")?;
        // on XOR active_low decides the level
        if on != active_low {
            outputs.pump.set_high();
        } else {
            outputs.pump.set_low();
        }
        tracing::debug!(on, "pump set");
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        if let Some(mut outputs) = self.outputs.take() {
            if let Err(e) = outputs.selector.clear_pwm() {
                tracing::warn!("failed to stop selector pwm: {e}");
            }
            if self.cfg.pump_active_low {
                outputs.pump.set_high();
            } else {
                outputs.pump.set_low();
            }
            // Dropping the pins restores their previous mode.
        }
    }
}

// ---------------------------------------------------------------------------
// Mock board (development — no hardware, records output changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
use std::collections::VecDeque;
#[cfg(not(feature = "gpio"))]
use tokio::time::Instant;

#[cfg(not(feature = "gpio"))]
const MAX_HISTORY: usize = 64;

#[cfg(not(feature = "gpio"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoardEvent {
    Claim,
    Select(u8),
    Pump(bool),
    Release,
}

#[cfg(not(feature = "gpio"))]
pub(crate) struct ActuatorBoard {
    cfg: ActuatorConfig,
    pub(crate) claimed: bool,
    pub(crate) position: u8,
    pub(crate) pump_on: bool,
    pub(crate) history: VecDeque<(Instant, BoardEvent)>,
    /// Makes the next `set_pump(true)` fail, to exercise fault handling.
    #[cfg(test)]
    pub(crate) fail_pump_on: bool,
    /// Makes the next `claim()` fail after the outputs are taken, like a
    /// real board whose initial pwm setup is refused.
    #[cfg(test)]
    pub(crate) fail_claim: bool,
}

#[cfg(not(feature = "gpio"))]
impl ActuatorBoard {
    pub(crate) fn new(cfg: &ActuatorConfig) -> Result<Self> {
        tracing::info!(
            selector_gpio = cfg.selector_gpio,
            pump_gpio = cfg.pump_gpio,
            "[mock-gpio] actuator board initialised (no hardware)"
        );
        Ok(Self {
            cfg: cfg.clone(),
            claimed: false,
            position: ALL_OFF,
            pump_on: false,
            history: VecDeque::with_capacity(MAX_HISTORY),
            #[cfg(test)]
            fail_pump_on: false,
            #[cfg(test)]
            fail_claim: false,
        })
    }

    pub(crate) fn claim(&mut self) -> Result<()> {
        self.claimed = true;
        self.position = ALL_OFF;
        self.pump_on = false;
        self.record(BoardEvent::Claim);
        self.injected_claim_fault()
    }

    pub(crate) fn select(&mut self, position: u8) -> Result<()> {
        anyhow::ensure!(self.claimed, "selector not claimed");
        let pulse_ns = self.cfg.pulse_ns(position)?;
        self.position = position;
        self.record(BoardEvent::Select(position));
        tracing::debug!(position, pulse_ns, "[mock-gpio] selector moved");
        Ok(())
    }

    pub(crate) fn set_pump(&mut self, on: bool) -> Result<()> {
        anyhow::ensure!(self.claimed, "pump not claimed");
        self.injected_fault(on)?;
        self.pump_on = on;
        self.record(BoardEvent::Pump(on));
        tracing::debug!(on, "[mock-gpio] pump set");
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        if self.claimed {
            if self.pump_on {
                tracing::warn!(position = self.position, "[mock-gpio] pump still on at release");
            }
            self.pump_on = false;
            self.claimed = false;
            self.record(BoardEvent::Release);
        }
    }

    #[cfg(test)]
    fn injected_fault(&mut self, on: bool) -> Result<()> {
        if on && std::mem::take(&mut self.fail_pump_on) {
            anyhow::bail!("injected pump fault");
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_fault(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn injected_claim_fault(&mut self) -> Result<()> {
        if std::mem::take(&mut self.fail_claim) {
            anyhow::bail!("injected claim fault");
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_claim_fault(&mut self) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, event: BoardEvent) {
        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((Instant::now(), event));
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn board() -> ActuatorBoard {
        ActuatorBoard::new(&ActuatorConfig::default()).unwrap()
    }

    fn events(b: &ActuatorBoard) -> Vec<BoardEvent> {
        b.history.iter().map(|(_, e)| *e).collect()
    }

    // -- ActuatorBoard (mock) -----------------------------------------------

    #[test]
    fn new_board_is_unclaimed_and_off() {
        let b = board();
        assert!(!b.claimed);
        assert!(!b.pump_on);
        assert_eq!(b.position, ALL_OFF);
    }

    #[test]
    fn outputs_require_a_claim() {
        let mut b = board();
        assert!(b.select(3).is_err());
        assert!(b.set_pump(true).is_err());
        assert!(b.history.is_empty());
    }

    #[test]
    fn claim_select_pump_release() {
        let mut b = board();
        b.claim().unwrap();
        b.select(4).unwrap();
        b.set_pump(true).unwrap();
        assert!(b.pump_on);
        b.release();
        assert!(!b.pump_on);
        assert!(!b.claimed);
        assert_eq!(
            events(&b),
            vec![
                BoardEvent::Claim,
                BoardEvent::Select(4),
                BoardEvent::Pump(true),
                BoardEvent::Release
            ]
        );
    }

    #[test]
    fn select_rejects_uncalibrated_position() {
        let mut b = board();
        b.claim().unwrap();
        assert!(b.select(8).is_err());
        assert_eq!(b.position, ALL_OFF);
    }

    #[test]
    fn release_without_claim_is_a_no_op() {
        let mut b = board();
        b.release();
        assert!(b.history.is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut b = board();
        b.claim().unwrap();
        for _ in 0..(MAX_HISTORY * 2) {
            b.set_pump(false).unwrap();
        }
        assert_eq!(b.history.len(), MAX_HISTORY);
    }
}
