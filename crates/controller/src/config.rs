//! TOML config file loading, environment overrides and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::schedule::ZONE_COUNT;

/// Default cap on a manual instant test: one hour.
pub const DEFAULT_MAX_INSTANT_TEST_SEC: u32 = 3600;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub actuators: ActuatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// How long one accept call waits before the loop moves on.
    pub accept_timeout_ms: u64,
    /// Read/write timeout for an accepted client.
    pub client_timeout_ms: u64,
    /// Pause at the end of every loop iteration.
    pub idle_pause_ms: u64,
    /// The schedule is evaluated when the clock's seconds cross a multiple of this.
    pub check_modulus_sec: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub schedule_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub selector_gpio: u8,
    pub pump_gpio: u8,
    pub pump_active_low: bool,
    pub selector_period_us: u64,
    /// Servo pulse width per selector position; index 0 closes every zone.
    pub selector_pulse_ns: Vec<u64>,
    /// Longest run a manual instant test may request.
    pub max_instant_test_sec: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 80)),
            accept_timeout_ms: 900,
            client_timeout_ms: 5000,
            idle_pause_ms: 100,
            check_modulus_sec: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            schedule_path: PathBuf::from("schedule.txt"),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            selector_gpio: 18,
            pump_gpio: 13,
            pump_active_low: false,
            selector_period_us: 20_000,
            selector_pulse_ns: vec![
                390_000, 660_000, 980_000, 1_350_000, 1_670_000, 1_990_000, 2_300_000, 2_600_000,
            ],
            max_instant_test_sec: DEFAULT_MAX_INSTANT_TEST_SEC,
        }
    }
}

impl ServerConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }
}

impl ActuatorConfig {
    /// Pulse width for a selector position (0 = all off, 1..=7 = zone).
    pub fn pulse_ns(&self, position: u8) -> Result<u64> {
        self.selector_pulse_ns
            .get(position as usize)
            .copied()
            .with_context(|| format!("no selector calibration for position {position}"))
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_server(&mut errors);
        self.validate_actuators(&mut errors);

        if self.storage.schedule_path.as_os_str().is_empty() {
            errors.push("storage: schedule_path is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_server(&self, errors: &mut Vec<String>) {
        let s = &self.server;

        for (name, value) in [
            ("accept_timeout_ms", s.accept_timeout_ms),
            ("client_timeout_ms", s.client_timeout_ms),
        ] {
            if value == 0 {
                errors.push(format!("server: {name} must be positive"));
            }
        }

        if !(1..=60).contains(&s.check_modulus_sec) || 60 % s.check_modulus_sec != 0 {
            errors.push(format!(
                "server: check_modulus_sec {} must divide 60",
                s.check_modulus_sec
            ));
        }
    }

    fn validate_actuators(&self, errors: &mut Vec<String>) {
        let a = &self.actuators;

        // ── GPIO pin whitelist ──────────────────────────────
        for (name, pin) in [("selector_gpio", a.selector_gpio), ("pump_gpio", a.pump_gpio)] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "actuators: {name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if a.selector_gpio == a.pump_gpio {
            errors.push(format!(
                "actuators: selector_gpio and pump_gpio are both {}",
                a.pump_gpio
            ));
        }

        if a.max_instant_test_sec == 0 {
            errors.push("actuators: max_instant_test_sec must be positive".to_string());
        }

        // ── Selector calibration ────────────────────────────
        if a.selector_period_us == 0 {
            errors.push("actuators: selector_period_us must be positive".to_string());
        }
        if a.selector_pulse_ns.len() != ZONE_COUNT + 1 {
            errors.push(format!(
                "actuators: selector_pulse_ns needs {} entries (off + {ZONE_COUNT} zones), got {}",
                ZONE_COUNT + 1,
                a.selector_pulse_ns.len()
            ));
        }
        let period_ns = a.selector_period_us.saturating_mul(1000);
        for (position, &ns) in a.selector_pulse_ns.iter().enumerate() {
            if ns == 0 || ns >= period_ns {
                errors.push(format!(
                    "actuators: selector_pulse_ns[{position}] = {ns} must be within (0, {period_ns})"
                ));
            }
        }
    }

    /// Environment overrides: `WEB_PORT`, `SCHEDULE_PATH`, `PUMP_ACTIVE_LOW`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("WEB_PORT").and_then(|s| s.parse().ok()) {
            self.server.bind.set_port(port);
        }
        if let Some(path) = var("SCHEDULE_PATH").filter(|p| !p.is_empty()) {
            self.storage.schedule_path = PathBuf::from(path);
        }
        if let Some(v) = var("PUMP_ACTIVE_LOW") {
            self.actuators.pump_active_low = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file (defaults if it does not exist), apply
/// environment overrides, then validate.
pub fn load(path: &str) -> Result<Config> {
    let mut config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path, "no config file, using defaults");
            Config::default()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };
    config.apply_env(|k| std::env::var(k).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
