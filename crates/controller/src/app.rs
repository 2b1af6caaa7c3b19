//! State owned by the control loop and handed to the router and dispatcher.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::board::ActuatorBoard;
use crate::clock::{self, SharedClock, SystemClock};
use crate::config::DEFAULT_MAX_INSTANT_TEST_SEC;
use crate::sequencer::{ActuationRequest, Sequencer};
use crate::state::{SharedState, SystemState, Trigger};
use crate::store::ScheduleStore;

#[derive(Clone)]
pub struct AppState {
    pub store: ScheduleStore,
    pub clock: SharedClock,
    /// Held for the whole actuation: at most one request is ever in flight.
    pub sequencer: Arc<Mutex<Sequencer>>,
    pub status: SharedState,
    /// Upper bound on a manual instant test, in seconds.
    pub max_instant_test_sec: u32,
}

impl AppState {
    pub(crate) fn new(store: ScheduleStore, clock: SystemClock, board: ActuatorBoard) -> Self {
        Self {
            store,
            clock: clock::shared(clock),
            sequencer: Arc::new(Mutex::new(Sequencer::new(board))),
            status: SystemState::shared(),
            max_instant_test_sec: DEFAULT_MAX_INSTANT_TEST_SEC,
        }
    }

    pub(crate) fn with_instant_test_limit(mut self, secs: u32) -> Self {
        self.max_instant_test_sec = secs;
        self
    }

    /// Run `req` to completion and record the outcome.
    ///
    /// The run lives in its own task, so the caller going away (a client
    /// hanging up mid-request) never stops a sequence halfway through. The
    /// caller still waits for it to finish.
    pub async fn actuate(&self, req: ActuationRequest, trigger: Trigger) -> Result<()> {
        let app = self.clone();
        tokio::spawn(async move { app.run_and_record(req, trigger).await })
            .await
            .context("actuation task panicked")?
    }

    async fn run_and_record(&self, req: ActuationRequest, trigger: Trigger) -> Result<()> {
        let outcome = self.sequencer.lock().await.run(req).await;

        let mut st = self.status.write().await;
        st.record_run(&req, trigger, outcome.is_ok());
        if let Err(e) = &outcome {
            st.record_error(format!("{req}: {e:#}"));
        }
        outcome
    }
}

// ===========================================================================
// Tests
// ===========================================================================
