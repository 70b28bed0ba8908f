//! Time helpers for invigil
//!
//! Telemetry timestamps cross machine boundaries (client clock vs. broker
//! clock), so everything on the wire is UTC. All call sites go through
//! `now()` so tests and future mock-time hooks have a single seam.

use chrono::{DateTime, Utc};

/// Get the current UTC time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way the durable event log expects it (RFC 3339).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn rfc3339_round_trip() {
        let ts = now();
        let s = format_timestamp(ts);
        let parsed: DateTime<Utc> = s.parse().unwrap();
        assert_eq!(parsed, ts);
    }
}
