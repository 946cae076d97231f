//! Timestamp helpers
//!
//! All timestamps emitted on the wire are RFC 3339 in UTC with millisecond
//! precision, e.g. `2025-03-01T12:00:00.000Z`.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp the way every xRegistry entity emits it.
pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
