//! HTTP routes for the configuration form and the status endpoint. Every
//! page except `/api/status` is HTML; unmatched requests get the form.

use anyhow::{ensure, Context};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tracing::{info, warn};

use crate::app::AppState;
use crate::form;
use crate::overlap;
use crate::page;
use crate::schedule::{Schedule, Zone};
use crate::sequencer::ActuationRequest;
use crate::state::Trigger;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Every unmatched path or method falls through to the configuration form.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submit_schedule", post(submit_schedule).fallback(index))
        .route("/change_time", post(change_time).fallback(index))
        .route("/instant_test", post(instant_test).fallback(index))
        .route("/api/status", get(api_status).fallback(index))
        .fallback(index)
        .with_state(state)
}

async fn render_form(app: &AppState) -> Html<String> {
    let schedule = app.store.load().await;
    let clock = app.clock.read().await.time_of_day().to_string();
    Html(page::config_form(&schedule, &clock))
}

async fn index(State(app): State<AppState>) -> Html<String> {
    render_form(&app).await
}

async fn submit_schedule(State(app): State<AppState>, body: Bytes) -> Response {
    let fields = form::parse_schedule_fields(&body);
    let schedule = Schedule::from_form(&fields);

    if let Some((a, b)) = overlap::find_overlap(&schedule) {
        let reason = format!("zones {a} and {b} overlap");
        warn!(%a, %b, "schedule rejected");
        app.status
            .write()
            .await
            .record_schedule(format!("rejected: {reason}"));
        return Html(page::schedule_rejected(&reason)).into_response();
    }

    if let Err(e) = app.store.save(&schedule).await {
        tracing::error!("failed to save schedule: {e:#}");
        app.status
            .write()
            .await
            .record_error(format!("schedule save failed: {e:#}"));
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(page::schedule_not_saved(&format!("{e:#}"))),
        )
            .into_response();
    }

    let active = schedule.spans().len();
    info!(active, "schedule saved");
    app.status
        .write()
        .await
        .record_schedule(format!("saved ({active} active zone(s))"));
    Html(page::schedule_saved()).into_response()
}

async fn change_time(State(app): State<AppState>, body: Bytes) -> Html<String> {
    match form::parse_time_change(&body) {
        Some(tod) => {
            app.clock.write().await.set_time_of_day(tod);
            info!(%tod, "system time changed");
            app.status
                .write()
                .await
                .record_clock(format!("time set to {tod}"));
        }
        None => warn!("time change without a usable new_time"),
    }
    render_form(&app).await
}

async fn instant_test(State(app): State<AppState>, body: Bytes) -> Html<String> {
    match parse_instant_request(&body, app.max_instant_test_sec) {
        Ok(req) => {
            info!(zone = %req.zone, secs = req.seconds, "instant test");
            // Errors are logged and recorded by `actuate`; the form is returned either way.
            let _ = app.actuate(req, Trigger::Manual).await;
        }
        Err(e) => {
            warn!("instant test not run: {e:#}");
            app.status
                .write()
                .await
                .record_error(format!("instant test not run: {e:#}"));
        }
    }
    render_form(&app).await
}

fn parse_instant_request(body: &[u8], max_secs: u32) -> anyhow::Result<ActuationRequest> {
    let test = form::parse_instant_test(body).context("zone or runtime missing")?;
    let zone: Zone = test.zone.parse()?;
    let seconds: u32 = test
        .runtime
        .trim()
        .parse()
        .with_context(|| format!("runtime '{}' is not a whole number of seconds", test.runtime))?;
    ensure!(
        seconds <= max_secs,
        "runtime {seconds}s exceeds the {max_secs}s limit"
    );
    Ok(ActuationRequest::new(zone, seconds))
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let schedule = app.store.load().await;
    let (clock, overridden) = {
        let c = app.clock.read().await;
        let t = c.now().time();
        (
            format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second()),
            c.is_overridden(),
        )
    };
    let st = app.status.read().await;
    Json(st.to_status(clock, overridden, schedule.to_view()))
}

// ===========================================================================
// Tests
// ===========================================================================
