//! Turns the remote `submissionCalendar` (epoch text → count) into per-day
//! counts in the caller's zone.
//!
//! The remote mixes second and millisecond keys, so units are decided by key
//! length: more than 10 digits is milliseconds. Anything malformed yields an
//! empty map; the heatmap then shows no activity instead of failing.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

pub type DateCount = BTreeMap<NaiveDate, u32>;

const SECONDS_KEY_MAX_DIGITS: usize = 10;

/// Indexes the raw JSON text. Entries are applied in source order and a later
/// entry for the same local date replaces an earlier one.
pub fn index_calendar_json(raw: Option<&str>, time_zone: Tz) -> DateCount {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return DateCount::new();
    };

    let parsed: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(error = %error, "discarding malformed submission calendar");
            return DateCount::new();
        }
    };
    let Some(object) = parsed.as_object() else {
        tracing::warn!("submission calendar is not a JSON object; showing no activity");
        return DateCount::new();
    };

    index_calendar(
        object
            .iter()
            .filter_map(|(key, value)| value.as_i64().map(|count| (key.as_str(), count))),
        time_zone,
    )
}

pub fn index_calendar<K, I>(entries: I, time_zone: Tz) -> DateCount
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, i64)>,
{
    let mut counts = DateCount::new();
    for (key, count) in entries {
        let Ok(count) = u32::try_from(count) else {
            continue;
        };
        let Some(date) = local_date(key.as_ref(), time_zone) else {
            continue;
        };
        counts.insert(date, count);
    }
    counts
}

fn local_date(key: &str, time_zone: Tz) -> Option<NaiveDate> {
    let key = key.trim();
    let raw = key.parse::<i64>().ok()?;
    let instant = if key.len() > SECONDS_KEY_MAX_DIGITS {
        DateTime::<Utc>::from_timestamp_millis(raw)?
    } else {
        DateTime::<Utc>::from_timestamp(raw, 0)?
    };
    Some(instant.with_timezone(&time_zone).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn seconds_and_millisecond_keys_resolve_to_distinct_dates() {
        let counts = index_calendar_json(
            Some(r#"{"1700000000": 3, "1700086400000": 5}"#),
            chrono_tz::UTC,
        );

        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get(&date("2023-11-14")), Some(&3));
        assert_eq!(counts.get(&date("2023-11-15")), Some(&5));
    }

    #[test]
    fn dates_follow_the_callers_time_zone() {
        // 2026-10-18T00:00:00Z is still the 17th on the US west coast.
        let raw = Some(r#"{"1792281600": 6}"#);

        let utc = index_calendar_json(raw, chrono_tz::UTC);
        let pacific = index_calendar_json(raw, chrono_tz::America::Los_Angeles);

        assert_eq!(utc.get(&date("2026-10-18")), Some(&6));
        assert_eq!(pacific.get(&date("2026-10-17")), Some(&6));
    }

    #[test]
    fn colliding_dates_keep_the_last_entry_seen() {
        let forward = index_calendar_json(
            Some(r#"{"1792281600": 2, "1792285200": 7}"#),
            chrono_tz::UTC,
        );
        let reversed = index_calendar_json(
            Some(r#"{"1792285200": 7, "1792281600": 2}"#),
            chrono_tz::UTC,
        );

        assert_eq!(forward.get(&date("2026-10-18")), Some(&7));
        assert_eq!(reversed.get(&date("2026-10-18")), Some(&2));
    }

    #[test]
    fn unparseable_keys_and_counts_are_skipped() {
        let counts = index_calendar_json(
            Some(r#"{"yesterday": 4, "1792195200": "3", "1792281600": -1, "1790812800": 1}"#),
            chrono_tz::UTC,
        );

        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&date("2026-10-01")), Some(&1));
    }

    #[test]
    fn missing_or_malformed_calendars_yield_no_activity() {
        assert!(index_calendar_json(None, chrono_tz::UTC).is_empty());
        assert!(index_calendar_json(Some("   "), chrono_tz::UTC).is_empty());
        assert!(index_calendar_json(Some("{\"1792281600\": 1"), chrono_tz::UTC).is_empty());
        assert!(index_calendar_json(Some("[1, 2, 3]"), chrono_tz::UTC).is_empty());
        assert!(index_calendar_json(Some("null"), chrono_tz::UTC).is_empty());
    }

    #[test]
    fn decoded_entries_index_the_same_way() {
        let counts = index_calendar(
            vec![("1700000000".to_string(), 3), ("1700086400000".to_string(), 5)],
            chrono_tz::UTC,
        );
        assert_eq!(counts.len(), 2);
    }

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(raw in ".{0,64}") {
            let _ = index_calendar_json(Some(&raw), chrono_tz::Asia::Tokyo);
        }

        #[test]
        fn every_valid_second_key_is_indexed(
            seconds in prop::collection::vec(0i64..4_000_000_000i64, 0..32),
        ) {
            let entries = seconds.iter().map(|value| (value.to_string(), 1i64));
            let counts = index_calendar(entries, chrono_tz::UTC);
            let expected = seconds
                .iter()
                .filter_map(|value| DateTime::<Utc>::from_timestamp(*value, 0))
                .map(|instant| instant.date_naive())
                .collect::<std::collections::BTreeSet<_>>();
            prop_assert_eq!(counts.keys().copied().collect::<std::collections::BTreeSet<_>>(), expected);
        }
    }
}
