mod app;
mod board;
mod clock;
mod config;
mod conn;
mod control;
mod dispatcher;
mod form;
mod overlap;
mod page;
mod schedule;
mod sequencer;
mod state;
mod store;
mod web;

use anyhow::{Context, Result};
use std::env;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use app::AppState;
use board::ActuatorBoard;
use clock::SystemClock;
use control::ControlLoop;
use store::ScheduleStore;

// One thread: the control loop is the only thing that ever runs.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Schedule file ───────────────────────────────────────────────
    // Loading once up front writes the default schedule if none exists yet.
    let store = ScheduleStore::new(cfg.storage.schedule_path.clone());
    let schedule = store.load().await;
    tracing::info!(
        path = %store.path().display(),
        active = schedule.spans().len(),
        "schedule ready"
    );

    // ── Actuators ───────────────────────────────────────────────────
    let board = ActuatorBoard::new(&cfg.actuators)?;

    let clock = SystemClock::from_host();
    tracing::info!(now = %clock.now(), "clock seeded from host");

    let app = AppState::new(store, clock, board)
        .with_instant_test_limit(cfg.actuators.max_instant_test_sec);
    app.status
        .write()
        .await
        .record_system("controller started".to_string());

    // ── Loop ────────────────────────────────────────────────────────
    let listener = TcpListener::bind(cfg.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.bind))?;

    ControlLoop::new(listener, app, &cfg.server).run().await;
    Ok(())
}
