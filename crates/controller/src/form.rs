//! `application/x-www-form-urlencoded` body decoding.
//!
//! Deliberately permissive: malformed pairs, bad escapes and missing fields
//! never fail the parse, they just leave the field absent. `+` is kept
//! literally rather than turned into a space.

use crate::schedule::{TimeOfDay, ZONE_COUNT};

// ---------------------------------------------------------------------------
// Generic key/value decoding
// ---------------------------------------------------------------------------

/// Decoded form pairs, in body order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Split on `&`, then on the first `=`, percent-decoding both halves.
/// Segments without `=` are kept as keys with an empty value.
pub fn decode(raw: &[u8]) -> FormData {
    let body = String::from_utf8_lossy(raw);
    let pairs = body
        .trim_end_matches(['\r', '\n', '\0'])
        .split('&')
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            let (k, v) = seg.split_once('=').unwrap_or((seg, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect();
    FormData { pairs }
}

/// Reverse `%XX` escapes. Invalid escapes are passed through untouched.
pub fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// Endpoint-specific extraction
// ---------------------------------------------------------------------------

/// Raw start/stop text for one schedule row. `None` is the "NULL" sentinel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowFields {
    pub start: Option<String>,
    pub stop: Option<String>,
}

/// Zone and runtime exactly as submitted; validated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantTest {
    pub zone: String,
    pub runtime: String,
}

fn non_empty(v: Option<&str>) -> Option<String> {
    v.map(str::trim)
        .filter(|v| !v.is_empty() && *v != "NULL")
        .map(str::to_string)
}

/// `start1..start7` / `stop1..stop7`, missing fields left as `None`.
pub fn parse_schedule_fields(body: &[u8]) -> [WindowFields; ZONE_COUNT] {
    let form = decode(body);
    std::array::from_fn(|i| WindowFields {
        start: non_empty(form.get(&format!("start{}", i + 1))),
        stop: non_empty(form.get(&format!("stop{}", i + 1))),
    })
}

/// Present only when both `zone` and `runtime` keys exist.
pub fn parse_instant_test(body: &[u8]) -> Option<InstantTest> {
    let form = decode(body);
    Some(InstantTest {
        zone: form.get("zone")?.to_string(),
        runtime: form.get("runtime")?.to_string(),
    })
}

/// `new_time` parsed as `HH:MM`; absent when the key is missing or unparseable.
pub fn parse_time_change(body: &[u8]) -> Option<TimeOfDay> {
    let form = decode(body);
    let raw = form.get("new_time")?;
    match raw.parse() {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(new_time = raw, "ignoring time change: {e:#}");
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- percent_decode -----------------------------------------------------

    #[test]
    fn decodes_the_legacy_escape_set() {
        assert_eq!(
            percent_decode("%3A%2F%20%3D%26%2C%2E"),
            ":/ =&,."
        );
    }

    #[test]
    fn decodes_lowercase_and_other_escapes() {
        assert_eq!(percent_decode("07%3a30"), "07:30");
        assert_eq!(percent_decode("a%21b"), "a!b");
    }

    #[test]
    fn plus_is_not_a_space() {
        assert_eq!(percent_decode("a+b"), "a+b");
    }

    #[test]
    fn invalid_escapes_pass_through() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%4"), "%4");
        assert_eq!(percent_decode("%%3A"), "%:");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        assert_eq!(percent_decode("a%FFb"), "a\u{FFFD}b");
    }

    // -- decode -------------------------------------------------------------

    #[test]
    fn decode_splits_pairs_before_unescaping() {
        let form = decode(b"a=1%262&b=x%3Dy");
        assert_eq!(form.get("a"), Some("1&2"));
        assert_eq!(form.get("b"), Some("x=y"));
        assert_eq!(form.len(), 2);
    }

    #[test]
    fn decode_tolerates_junk() {
        let form = decode(b"&&novalue&=orphan&k=v\r\n");
        assert_eq!(form.get("novalue"), Some(""));
        assert_eq!(form.get("k"), Some("v"));
        assert_eq!(form.get("missing"), None);
    }

    #[test]
    fn decode_keeps_first_duplicate() {
        let form = decode(b"k=1&k=2");
        assert_eq!(form.get("k"), Some("1"));
    }

    // -- parse_schedule_fields ----------------------------------------------

    #[test]
    fn schedule_fields_default_to_null() {
        let rows = parse_schedule_fields(b"start1=07%3A00&stop1=07%3A30&start3=09%3A00");
        assert_eq!(rows[0].start.as_deref(), Some("07:00"));
        assert_eq!(rows[0].stop.as_deref(), Some("07:30"));
        assert_eq!(rows[2].start.as_deref(), Some("09:00"));
        assert_eq!(rows[2].stop, None);
        assert_eq!(rows[6], WindowFields::default());
    }

    #[test]
    fn empty_and_null_values_are_unset() {
        let rows = parse_schedule_fields(b"start1=&stop1=NULL");
        assert_eq!(rows[0], WindowFields::default());
    }

    #[test]
    fn start10_does_not_shadow_start1() {
        let rows = parse_schedule_fields(b"start10=01%3A00&start1=02%3A00");
        assert_eq!(rows[0].start.as_deref(), Some("02:00"));
    }

    // -- parse_instant_test -------------------------------------------------

    #[test]
    fn instant_test_needs_both_keys() {
        assert_eq!(
            parse_instant_test(b"zone=3&runtime=15"),
            Some(InstantTest {
                zone: "3".into(),
                runtime: "15".into()
            })
        );
        assert_eq!(parse_instant_test(b"zone=3"), None);
        assert_eq!(parse_instant_test(b"runtime=15"), None);
    }

    // -- parse_time_change --------------------------------------------------

    #[test]
    fn time_change_is_unescaped_then_parsed() {
        let t = parse_time_change(b"new_time=13%3A45&change_time=").unwrap();
        assert_eq!(t.to_string(), "13:45");
    }

    #[test]
    fn time_change_missing_or_bad_is_absent() {
        assert!(parse_time_change(b"other=1").is_none());
        assert!(parse_time_change(b"new_time=").is_none());
        assert!(parse_time_change(b"new_time=25%3A00").is_none());
    }
}
