// Server timestamp policy.
//
// The backend serializes DateTime values without a timezone designator
// ("2024-11-09T15:30:00"). Those are UTC instants, so a missing designator
// gets a `Z` appended before parsing. They are never interpreted in the
// client's local zone.

use chrono::{DateTime, Utc};

fn has_zone_designator(s: &str) -> bool {
    if s.ends_with('Z') || s.ends_with('z') {
        return true;
    }
    // trailing +hh:mm / -hh:mm offset
    let b = s.as_bytes();
    if b.len() < 6 {
        return false;
    }
    let tail = &b[b.len() - 6..];
    (tail[0] == b'+' || tail[0] == b'-')
        && tail[1].is_ascii_digit()
        && tail[2].is_ascii_digit()
        && tail[3] == b':'
        && tail[4].is_ascii_digit()
        && tail[5].is_ascii_digit()
}

pub fn parse_server_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = if has_zone_designator(raw) {
        raw.to_string()
    } else {
        format!("{}Z", raw)
    };
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
