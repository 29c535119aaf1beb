use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub id: String,
    pub payload: String,
    pub version: String,
    pub last_updated: String,
}

/// Outcome of a conditional write against the stored concurrency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCheck {
    Applied { last_updated: String },
    Mismatch { current: String },
    NotFound,
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Token to store after a successful write.
///
/// Tokens only move forward: when `now` (at millisecond precision) is not
/// after `previous`, the result is `previous` plus one millisecond.
pub fn next_token(previous: &str, now: DateTime<Utc>) -> String {
    let now = now.trunc_subsecs(3);
    match DateTime::parse_from_rfc3339(previous) {
        Ok(prev) => {
            let prev = prev.with_timezone(&Utc);
            if now > prev {
                format_timestamp(now)
            } else {
                format_timestamp(prev + chrono::Duration::milliseconds(1))
            }
        }
        Err(e) => {
            tracing::warn!(token = previous, error = %e, "stored token is not a timestamp");
            format_timestamp(now)
        }
    }
}
