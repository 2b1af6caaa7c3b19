//! The cooperative control loop.
//!
//! One task does everything: wait briefly for a client, serve it, look at the
//! clock, maybe run the schedule, pause, repeat. Actuations are awaited inline,
//! so while a zone is watering nothing else happens; clients queue in the
//! listen backlog and scheduled starts that fall inside the run are missed.

use std::time::Duration;
use time::{Date, PrimitiveDateTime};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tracing::{info, trace, warn};

use crate::app::AppState;
use crate::config::ServerConfig;
use crate::conn;
use crate::dispatcher;
use crate::schedule::TimeOfDay;
use crate::web;

// ---------------------------------------------------------------------------
// Minute gate
// ---------------------------------------------------------------------------

/// Decides when the loop should consult the schedule: at most once per
/// `modulus`-second bucket of the clock, and never twice for the same minute.
#[derive(Debug)]
pub struct MinuteGate {
    modulus: u32,
    last_bucket: Option<u32>,
    last_minute: Option<(Date, TimeOfDay)>,
}

impl MinuteGate {
    pub fn new(modulus_sec: u8) -> Self {
        Self {
            modulus: u32::from(modulus_sec.max(1)),
            last_bucket: None,
            last_minute: None,
        }
    }

    /// Returns the minute to evaluate, if the schedule is due a check at `now`.
    pub fn poll(&mut self, now: PrimitiveDateTime) -> Option<TimeOfDay> {
        let (h, m, s) = now.time().as_hms();
        let seconds = u32::from(h) * 3600 + u32::from(m) * 60 + u32::from(s);
        let bucket = seconds / self.modulus;
        if self.last_bucket == Some(bucket) {
            return None;
        }
        self.last_bucket = Some(bucket);

        let minute = (now.date(), TimeOfDay::from(now.time()));
        if self.last_minute == Some(minute) {
            return None;
        }
        self.last_minute = Some(minute);
        Some(minute.1)
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct ControlLoop {
    listener: TcpListener,
    router: axum::Router,
    app: AppState,
    gate: MinuteGate,
    accept_timeout: Duration,
    client_timeout: Duration,
    idle_pause: Duration,
}

impl ControlLoop {
    pub fn new(listener: TcpListener, app: AppState, cfg: &ServerConfig) -> Self {
        Self {
            listener,
            router: conn::with_limits(web::router(app.clone()), cfg.client_timeout()),
            app,
            gate: MinuteGate::new(cfg.check_modulus_sec),
            accept_timeout: cfg.accept_timeout(),
            client_timeout: cfg.client_timeout(),
            idle_pause: cfg.idle_pause(),
        }
    }

    /// Run forever. Nothing the loop does is fatal.
    pub async fn run(mut self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "control loop listening");
        }
        loop {
            self.turn().await;
            sleep(self.idle_pause).await;
        }
    }

    /// One iteration without the trailing pause: serve at most one client,
    /// then run the schedule check if the gate opens.
    pub async fn turn(&mut self) {
        match timeout(self.accept_timeout, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                trace!(%peer, "client connected");
                if let Err(e) = conn::serve(stream, &self.router, self.client_timeout).await {
                    warn!(%peer, "request failed: {e:#}");
                }
            }
            Ok(Err(e)) => warn!("accept failed: {e}"),
            Err(_) => trace!("no client"),
        }

        let now = self.app.clock.read().await.now();
        if let Some(minute) = self.gate.poll(now) {
            dispatcher::check(&self.app, minute).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn gate_opens_once_per_minute() {
        let mut gate = MinuteGate::new(5);

        assert_eq!(
            gate.poll(datetime!(2025-03-18 07:01:00)),
            Some(TimeOfDay::new(7, 1).unwrap())
        );
        // Same bucket.
        assert_eq!(gate.poll(datetime!(2025-03-18 07:01:03)), None);
        // New bucket, same minute.
        assert_eq!(gate.poll(datetime!(2025-03-18 07:01:05)), None);
        assert_eq!(gate.poll(datetime!(2025-03-18 07:01:59)), None);
        assert_eq!(
            gate.poll(datetime!(2025-03-18 07:02:00)),
            Some(TimeOfDay::new(7, 2).unwrap())
        );
    }

    #[test]
    fn gate_catches_a_minute_entered_mid_way() {
        let mut gate = MinuteGate::new(5);
        gate.poll(datetime!(2025-03-18 07:00:58));

        // The loop was busy across the boundary; the first look inside 07:01
        // still counts.
        assert_eq!(
            gate.poll(datetime!(2025-03-18 07:01:37)),
            Some(TimeOfDay::new(7, 1).unwrap())
        );
    }

    #[test]
    fn gate_skips_minutes_it_never_sees() {
        let mut gate = MinuteGate::new(5);
        gate.poll(datetime!(2025-03-18 07:00:10));

        assert_eq!(
            gate.poll(datetime!(2025-03-18 07:03:00)),
            Some(TimeOfDay::new(7, 3).unwrap())
        );
    }

    #[test]
    fn gate_reopens_for_the_same_minute_on_another_day() {
        let mut gate = MinuteGate::new(5);
        gate.poll(datetime!(2025-03-18 07:01:00));

        assert!(gate.poll(datetime!(2025-03-19 07:01:00)).is_some());
    }

    #[test]
    fn gate_follows_the_clock_backwards() {
        let mut gate = MinuteGate::new(5);
        gate.poll(datetime!(2025-03-18 09:30:00));

        assert_eq!(
            gate.poll(datetime!(2025-03-18 07:01:00)),
            Some(TimeOfDay::new(7, 1).unwrap())
        );
    }

    #[cfg(not(feature = "gpio"))]
    mod loopback {
        use super::*;
        use crate::board::ActuatorBoard;
        use crate::clock::SystemClock;
        use crate::config::ActuatorConfig;
        use crate::schedule::Schedule;
        use crate::store::ScheduleStore;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        struct Harness {
            ctl: ControlLoop,
            addr: std::net::SocketAddr,
            store: ScheduleStore,
            _dir: tempfile::TempDir,
        }

        async fn harness() -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let store = ScheduleStore::new(dir.path().join("schedule.txt"));
            store.save(&Schedule::default()).await.unwrap();

            let board = ActuatorBoard::new(&ActuatorConfig::default()).unwrap();
            // Noon: nothing in the default schedule is due.
            let clock = SystemClock::starting_at(datetime!(2025-03-18 12:00:00));
            let app = AppState::new(store.clone(), clock, board);

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let cfg = ServerConfig {
                accept_timeout_ms: 5_000,
                ..ServerConfig::default()
            };
            Harness {
                ctl: ControlLoop::new(listener, app, &cfg),
                addr,
                store,
                _dir: dir,
            }
        }

        async fn exchange(ctl: &mut ControlLoop, addr: std::net::SocketAddr, raw: &str) -> String {
            let raw = raw.to_owned();
            let client = tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream.write_all(raw.as_bytes()).await.unwrap();
                let mut out = String::new();
                stream.read_to_string(&mut out).await.unwrap();
                out
            });
            ctl.turn().await;
            client.await.unwrap()
        }

        fn body(response: &str) -> &str {
            response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
        }

        #[tokio::test]
        async fn unknown_path_serves_the_form() {
            let mut h = harness().await;

            let root = exchange(&mut h.ctl, h.addr, "GET / HTTP/1.1\r\n\r\n").await;
            let other = exchange(&mut h.ctl, h.addr, "GET /favicon.ico HTTP/1.1\r\n\r\n").await;

            assert!(root.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(root.to_lowercase().contains("connection: close\r\n"));
            assert!(body(&root).contains("Set Schedule"));
            assert_eq!(body(&root), body(&other));
        }

        #[tokio::test]
        async fn overlapping_submission_leaves_the_file_alone() {
            let mut h = harness().await;
            let before = tokio::fs::read_to_string(h.store.path()).await.unwrap();

            let form = "start1=06%3A00&stop1=06%3A30&start2=06%3A15&stop2=06%3A45";
            let raw = format!(
                "POST /submit_schedule HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{form}",
                form.len()
            );
            let resp = exchange(&mut h.ctl, h.addr, &raw).await;

            assert!(body(&resp).contains("Schedule not accepted"));
            let after = tokio::fs::read_to_string(h.store.path()).await.unwrap();
            assert_eq!(before, after);
        }

        #[tokio::test]
        async fn accepted_submission_is_served_back() {
            let mut h = harness().await;

            let form = "start3=18%3A00&stop3=18%3A20";
            let raw = format!(
                "POST /submit_schedule HTTP/1.1\r\nContent-Length: {}\r\n\r\n{form}",
                form.len()
            );
            let resp = exchange(&mut h.ctl, h.addr, &raw).await;
            assert!(body(&resp).contains("Schedule Submitted Successfully"));

            let page = exchange(&mut h.ctl, h.addr, "GET / HTTP/1.1\r\n\r\n").await;
            assert!(page.contains(r#"name="start3" value="18:00""#));
            assert!(page.contains(r#"name="start1" value="""#));
        }

        #[tokio::test]
        async fn chunked_submission_is_saved_in_full() {
            let mut h = harness().await;

            let form = "start1=06%3A00&stop1=06%3A30";
            let raw = format!(
                "POST /submit_schedule HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{form}\r\n0\r\n\r\n",
                form.len()
            );
            let resp = exchange(&mut h.ctl, h.addr, &raw).await;
            assert!(body(&resp).contains("Schedule Submitted Successfully"));

            let on_disk = tokio::fs::read_to_string(h.store.path()).await.unwrap();
            assert!(on_disk.starts_with("row1, 6, 0, 6, 30, 30\n"), "{on_disk}");
        }

        #[tokio::test]
        async fn bare_line_feed_request_is_answered() {
            let mut h = harness().await;

            let resp = exchange(&mut h.ctl, h.addr, "GET / HTTP/1.1\nHost: x\n\n").await;
            assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(body(&resp).contains("Set Schedule"));
        }

        #[tokio::test]
        async fn garbage_gets_a_400_and_the_loop_carries_on() {
            let mut h = harness().await;

            let resp = exchange(&mut h.ctl, h.addr, "\u{1}\r\n\r\n").await;
            assert!(resp.starts_with("HTTP/1.1 400"));

            let page = exchange(&mut h.ctl, h.addr, "GET / HTTP/1.1\r\n\r\n").await;
            assert!(page.starts_with("HTTP/1.1 200 OK\r\n"));
        }

        #[tokio::test]
        async fn scheduled_start_runs_from_the_loop() {
            let dir = tempfile::tempdir().unwrap();
            let store = ScheduleStore::new(dir.path().join("schedule.txt"));
            store.save(&Schedule::default()).await.unwrap();
            let board = ActuatorBoard::new(&ActuatorConfig::default()).unwrap();
            let app = AppState::new(store, SystemClock::starting_at(datetime!(2025-03-18 07:01:00)), board);

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let cfg = ServerConfig {
                accept_timeout_ms: 1,
                ..ServerConfig::default()
            };
            let mut ctl = ControlLoop::new(listener, app.clone(), &cfg);

            tokio::time::pause();
            ctl.turn().await;

            let st = app.status.read().await;
            let run = st.last_run.as_ref().unwrap();
            assert_eq!(run.zone.get(), 1);
            assert_eq!(run.seconds, 60);
        }
    }
}
