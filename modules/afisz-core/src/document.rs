use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Normalized event document — the single contract between the source
/// adapters and the integrator. All fields are strings as delivered by the
/// portals; timestamps are epoch seconds as decimal digits or the literal
/// `"null"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedEvent {
    pub event_name: String,
    pub start_date: String,
    pub end_date: String,
    pub thumbnail: String,
    pub url: String,
    pub location: String,
    /// Scraped venue name, resolved against the places provider later.
    pub place: String,
    pub category: String,
    /// Comma-separated.
    pub tags: String,
    /// Comma-separated.
    pub artists: String,
    pub description: String,
    /// Adapter identifier.
    pub source: String,
}

/// Parse an epoch timestamp string into UTC. Values longer than 10 digits are
/// treated as milliseconds and divided down to seconds. `"null"`, empty and
/// unparseable input yield `None`.
pub fn parse_epoch_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return None;
    }
    let mut value: i64 = raw.parse().ok()?;
    if raw.len() > 10 {
        value /= 1000;
    }
    Utc.timestamp_opt(value, 0).single()
}

/// Coerce a portal timestamp to epoch seconds in string form, for mappers
/// that receive millisecond values. Unparseable input becomes `"null"`.
pub fn coerce_epoch_seconds(raw: &str) -> String {
    match parse_epoch_timestamp(raw) {
        Some(ts) => ts.timestamp().to_string(),
        None => "null".to_string(),
    }
}

/// Split a comma-separated name field into trimmed, non-empty, de-duplicated
/// names, preserving first-seen order.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_and_milliseconds_agree() {
        let from_seconds = parse_epoch_timestamp("1735689600").unwrap();
        let from_millis = parse_epoch_timestamp("1735689600000").unwrap();
        assert_eq!(from_seconds, from_millis);
        assert_eq!(from_seconds.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn null_and_garbage_parse_to_none() {
        assert!(parse_epoch_timestamp("null").is_none());
        assert!(parse_epoch_timestamp("").is_none());
        assert!(parse_epoch_timestamp("next friday").is_none());
    }

    #[test]
    fn coercion_keeps_seconds_and_downscales_millis() {
        assert_eq!(coerce_epoch_seconds("1735689600"), "1735689600");
        assert_eq!(coerce_epoch_seconds("1735689600000"), "1735689600");
        assert_eq!(coerce_epoch_seconds("not a number"), "null");
    }

    #[test]
    fn name_list_trims_dedupes_and_drops_empties() {
        let names = parse_name_list(" Dawid Podsiadło, , Taco Hemingway ,Dawid Podsiadło");
        assert_eq!(names, vec!["Dawid Podsiadło", "Taco Hemingway"]);
        assert!(parse_name_list("").is_empty());
        assert!(parse_name_list(" , ,").is_empty());
    }
}
