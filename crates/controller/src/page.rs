//! HTML pages served by the controller.

use std::fmt::Write;

use crate::schedule::{Schedule, Zone};

const STYLE: &str = r#"<style>
  body { font-family: sans-serif; margin: 1.5em; }
  .schedule-row { display: flex; align-items: center; margin-bottom: 10px; }
  .schedule-row label, .schedule-row input { margin-right: 10px; }
  .error { color: #b00020; }
</style>"#;

fn document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title>\n{STYLE}\n</head>\n<body>\n{body}\n</body>\n</html>\n"
    )
}

/// The configuration form, pre-filled from `schedule` and showing `clock`.
pub fn config_form(schedule: &Schedule, clock: &str) -> String {
    let mut body = String::new();

    body.push_str("<h1>Set Schedule</h1>\n");
    let _ = write!(
        body,
        r#"<form method="POST" action="/change_time">
  <div class="schedule-row">
    <label>Current System Time: </label>
    <input type="text" value="{clock}" readonly>
    <label for="new_time">Set Time: </label>
    <input type="time" id="new_time" name="new_time" required>
    <button type="submit">Change Time</button>
  </div>
</form>
<hr>
<form method="POST" action="/submit_schedule">
"#
    );

    for (zone, window) in schedule.iter() {
        let (start, stop) = window
            .map(|w| (w.start.to_string(), w.stop.to_string()))
            .unwrap_or_default();
        let _ = write!(
            body,
            r#"  <div class="schedule-row">
    <label for="start{zone}">Zone {zone} Start Time: </label>
    <input type="time" id="start{zone}" name="start{zone}" value="{start}">
    <label for="stop{zone}">Zone {zone} Stop Time: </label>
    <input type="time" id="stop{zone}" name="stop{zone}" value="{stop}">
  </div>
"#
        );
    }

    body.push_str(
        r#"  <button type="submit">Submit Schedule</button>
  <p><i>Each zone runs for its whole window. Only one zone can run at a time, so windows must not overlap. Leave both times empty to disable a zone.</i></p>
</form>
<hr>
<form method="POST" action="/instant_test">
  <div class="schedule-row">
    <label for="zone">Instant Test - Select Zone: </label>
    <select id="zone" name="zone">
"#,
    );
    for zone in Zone::all() {
        let _ = writeln!(body, r#"      <option value="{zone}">Zone {zone}</option>"#);
    }
    body.push_str(
        r#"    </select>
    <label for="runtime">Run Time (seconds): </label>
    <input type="number" id="runtime" name="runtime" min="0" required>
    <button type="submit">Run Test</button>
  </div>
</form>"#,
    );

    document("Set Schedule", &body)
}

pub fn schedule_saved() -> String {
    document(
        "Schedule Submitted",
        "<h1>Schedule Submitted Successfully!</h1>\n<a href=\"/\">Go back to Schedule Form</a>",
    )
}

/// Shown when a submitted schedule is refused; nothing was saved.
pub fn schedule_rejected(reason: &str) -> String {
    document(
        "Schedule Submission Error",
        &format!(
            "<h1 class=\"error\">Schedule not accepted: {}</h1>\n<p>Only 1 zone may operate at a time.</p>\n<a href=\"/\">Go back to Schedule Form</a>",
            escape(reason)
        ),
    )
}

pub fn schedule_not_saved(reason: &str) -> String {
    document(
        "Schedule Not Saved",
        &format!(
            "<h1 class=\"error\">The schedule could not be saved.</h1>\n<pre>{}</pre>\n<a href=\"/\">Go back to Schedule Form</a>",
            escape(reason)
        ),
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_prefills_set_rows_and_blanks_unset_rows() {
        let mut s = Schedule::default();
        s.set(Zone::new(6).unwrap(), None);
        let html = config_form(&s, "09:41");

        assert!(html.contains(r#"name="start1" value="07:01""#));
        assert!(html.contains(r#"name="stop7" value="07:14""#));
        assert!(html.contains(r#"name="start6" value="""#));
        assert!(html.contains(r#"value="09:41" readonly"#));
        assert_eq!(html.matches("<option value=").count(), 7);
    }

    #[test]
    fn form_posts_to_every_endpoint() {
        let html = config_form(&Schedule::empty(), "00:00");
        for action in ["/change_time", "/submit_schedule", "/instant_test"] {
            assert!(html.contains(&format!(r#"action="{action}""#)), "{action}");
        }
    }

    #[test]
    fn rejection_page_escapes_reason() {
        let html = schedule_rejected("<zones 1 & 2>");
        assert!(html.contains("&lt;zones 1 &amp; 2&gt;"));
        assert!(html.contains("Schedule not accepted"));
    }

    #[test]
    fn saved_page_links_back() {
        assert!(schedule_saved().contains(r#"<a href="/">"#));
    }
}
