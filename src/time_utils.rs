// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.
//!
//! Timestamps are stored as unix seconds and surfaced as RFC3339 on the wire
//! (both toward the frontend and toward the Google API).

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a unix-seconds timestamp as RFC3339 (`Z` suffix).
pub fn format_unix_rfc3339(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(format_utc_rfc3339)
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Parse an RFC3339 timestamp (any offset) into unix seconds.
pub fn parse_rfc3339_unix(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}
