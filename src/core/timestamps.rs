//! Parsed-time index over a channel's timestamp labels.
//!
//! Raw labels are loosely formatted (bare times, date-times, logger prefixes).
//! Each one is reduced to a time of day and stored in a sorted map pointing at
//! the first row that carries it, so event lookups are exact or nearest-match
//! searches instead of free-text containment.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
];

const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Format of event start labels in the test conditions.
pub const EVENT_TIME_FORMAT: &str = "%H:%M:%S";

/// How an event start time is matched to a channel row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MatchPolicy {
    /// First row whose time falls within the event's second
    #[default]
    Exact,
    /// Closest row within `tolerance_s` seconds of the event
    Nearest { tolerance_s: f64 },
}

/// Extract the time of day from a timestamp label.
pub fn parse_label_time(label: &str) -> Option<NaiveTime> {
    let label = label.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(label) {
        return Some(dt.time());
    }

    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(label, fmt).ok())
    {
        return Some(dt.time());
    }

    // Bare time, or a time token embedded in extra text
    label
        .split(|c: char| c.is_whitespace() || c == 'T' || c == ',' || c == ';')
        .find_map(|token| NaiveTime::parse_from_str(token, TIME_FORMAT).ok())
}

/// Parse an event start label. Only `HH:MM:SS` is accepted.
pub fn parse_event_time(label: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(label.trim(), EVENT_TIME_FORMAT).ok()
}

/// Sorted mapping from time of day to the first row carrying it.
#[derive(Debug, Clone, Default)]
pub struct TimestampIndex {
    by_time: BTreeMap<NaiveTime, usize>,
    rows: usize,
    unparsed: usize,
}

impl TimestampIndex {
    /// Build the index from labels in row order.
    pub fn build<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self::default();

        for (row, label) in labels.into_iter().enumerate() {
            index.rows += 1;
            match parse_label_time(label) {
                Some(time) => {
                    index.by_time.entry(time).or_insert(row);
                }
                None => index.unparsed += 1,
            }
        }

        index
    }

    /// Row matching `event` under `policy`, if any.
    pub fn lookup(&self, event: NaiveTime, policy: MatchPolicy) -> Option<usize> {
        match policy {
            MatchPolicy::Exact => self.lookup_exact(event),
            MatchPolicy::Nearest { tolerance_s } => self.lookup_nearest(event, tolerance_s),
        }
    }

    fn lookup_exact(&self, event: NaiveTime) -> Option<usize> {
        let (end, wrapped) = event.overflowing_add_signed(Duration::seconds(1));
        let first = if wrapped != 0 {
            self.by_time.range(event..).next()
        } else {
            self.by_time.range(event..end).next()
        };
        first.map(|(_, &row)| row)
    }

    fn lookup_nearest(&self, event: NaiveTime, tolerance_s: f64) -> Option<usize> {
        let tolerance_ms = (tolerance_s * 1000.0).round() as i64;
        let distance_ms = |time: &NaiveTime| (*time - event).num_milliseconds().abs();

        let before = self.by_time.range(..=event).next_back();
        let after = self.by_time.range(event..).next();

        let best = match (before, after) {
            (Some(b), Some(a)) => {
                let (db, da) = (distance_ms(b.0), distance_ms(a.0));
                if db < da || (db == da && b.1 <= a.1) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (b, a) => b.or(a),
        }?;

        (distance_ms(best.0) <= tolerance_ms).then_some(*best.1)
    }

    /// Number of labels indexed, parsed or not.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Labels that carried no recognizable time.
    pub fn unparsed_count(&self) -> usize {
        self.unparsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    #[test]
    fn test_parse_label_formats() {
        assert_eq!(parse_label_time("12:30:05"), Some(t("12:30:05")));
        assert_eq!(parse_label_time("2024-03-01 12:30:05"), Some(t("12:30:05")));
        assert_eq!(parse_label_time("2024-03-01T12:30:05"), Some(t("12:30:05")));
        assert_eq!(parse_label_time("01/03/2024 12:30:05"), Some(t("12:30:05")));
        assert_eq!(parse_label_time("Logged 12:30:05 ch0"), Some(t("12:30:05")));
        assert_eq!(
            parse_label_time("12:30:05.250"),
            NaiveTime::from_hms_milli_opt(12, 30, 5, 250)
        );
        assert_eq!(parse_label_time("not a time"), None);
    }

    #[test]
    fn test_event_time_is_strict() {
        assert_eq!(parse_event_time(" 12:30:05 "), Some(t("12:30:05")));
        assert_eq!(parse_event_time("2024-03-01 12:30:05"), None);
        assert_eq!(parse_event_time("12:30:05.250"), None);
        assert_eq!(parse_event_time("Logged 12:30:05"), None);
    }

    #[test]
    fn test_exact_match_first_row_wins() {
        let labels = ["10:00:00", "10:00:01", "10:00:01", "10:00:02"];
        let index = TimestampIndex::build(labels.iter().copied());

        assert_eq!(index.lookup(t("10:00:01"), MatchPolicy::Exact), Some(1));
        assert_eq!(index.lookup(t("10:00:03"), MatchPolicy::Exact), None);
    }

    #[test]
    fn test_exact_match_subsecond_sampling() {
        let labels = ["10:00:00.5", "10:00:01.0", "10:00:01.5", "10:00:02.0"];
        let index = TimestampIndex::build(labels.iter().copied());

        assert_eq!(index.lookup(t("10:00:01"), MatchPolicy::Exact), Some(1));
        assert_eq!(index.lookup(t("10:00:00"), MatchPolicy::Exact), Some(0));
    }

    #[test]
    fn test_exact_match_does_not_confuse_near_duplicates() {
        // "1:00:01" is a substring of "11:00:01"; parsed times keep them apart
        let labels = ["11:00:01", "01:00:01"];
        let index = TimestampIndex::build(labels.iter().copied());
        assert_eq!(index.lookup(t("01:00:01"), MatchPolicy::Exact), Some(1));
    }

    #[test]
    fn test_exact_match_at_midnight_boundary() {
        let labels = ["23:59:58", "23:59:59"];
        let index = TimestampIndex::build(labels.iter().copied());
        assert_eq!(index.lookup(t("23:59:59"), MatchPolicy::Exact), Some(1));
    }

    #[test]
    fn test_nearest_match_within_tolerance() {
        let labels = ["10:00:00", "10:00:05", "10:00:10"];
        let index = TimestampIndex::build(labels.iter().copied());
        let policy = MatchPolicy::Nearest { tolerance_s: 2.0 };

        assert_eq!(index.lookup(t("10:00:06"), policy), Some(1));
        assert_eq!(index.lookup(t("10:00:09"), policy), Some(2));
        assert_eq!(index.lookup(t("10:00:20"), policy), None);
    }

    #[test]
    fn test_nearest_tie_prefers_earlier_row() {
        let labels = ["10:00:00", "10:00:04"];
        let index = TimestampIndex::build(labels.iter().copied());
        let policy = MatchPolicy::Nearest { tolerance_s: 5.0 };
        assert_eq!(index.lookup(t("10:00:02"), policy), Some(0));
    }

    #[test]
    fn test_unparsed_labels_counted() {
        let labels = ["10:00:00", "garbage", "10:00:02"];
        let index = TimestampIndex::build(labels.iter().copied());
        assert_eq!(index.len(), 3);
        assert_eq!(index.unparsed_count(), 1);
        assert_eq!(index.lookup(t("10:00:02"), MatchPolicy::Exact), Some(2));
    }
}
