use chrono::{DateTime, SecondsFormat, Utc};

// ============== Timestamp Helpers ==============

/// Feed-native timestamp format, e.g. `Wed Aug 12 00:42:51 -0100 2015`.
const FEED_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Convert a feed-native timestamp to ISO-8601 UTC with millisecond precision.
///
/// Returns `None` when the input is not in the feed format.
pub fn feed_date_to_iso8601(feed_date: &str) -> Option<String> {
    let parsed = DateTime::parse_from_str(feed_date.trim(), FEED_DATE_FORMAT).ok()?;
    Some(
        parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Append a timestamp to an outbound reply.
///
/// The feed rejects duplicate status texts, so identical templates sent to
/// different authors need a varying suffix.
pub fn add_timestamp(message: &str, now: DateTime<Utc>) -> String {
    let ts = now.format("%H:%M:%S %d/%m/%Y");
    format!("{message} {ts}")
}
