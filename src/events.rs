// src/events.rs
//! Event dates, the "still upcoming" filter and event ordering.
//!
//! Providers send `yyyy-MM-ddTHH:mm:ss±zzzz` timestamps or bare `yyyy-MM-dd`
//! dates. Bare dates mean midnight in the event's own time zone (UTC when
//! unknown). Strings that parse as neither leave the date unset.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::cmp::Ordering;

use crate::filter::by_distance_then_name;
use crate::model::Record;

const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";
const DATE_ONLY_LEN: usize = 10;

pub fn parse_time_zone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

pub fn parse_event_time(raw: &str, zone: Option<Tz>) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.len() > DATE_ONLY_LEN {
        return DateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok();
    }
    let date = NaiveDate::parse_from_str(raw, DATE_ONLY_FORMAT).ok()?;
    let midnight = date.and_time(NaiveTime::MIN);
    match zone {
        Some(tz) => tz
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.fixed_offset()),
        None => Some(Utc.from_utc_datetime(&midnight).fixed_offset()),
    }
}

/// Fill `starts_at` / `ends_at` from the raw schedule strings.
pub fn apply_dates(event: &mut Record, zone: Option<Tz>) {
    let Some(schedule) = event.schedule.as_ref() else {
        return;
    };
    event.starts_at = schedule
        .start_time
        .as_deref()
        .and_then(|s| parse_event_time(s, zone));
    event.ends_at = schedule
        .end_time
        .as_deref()
        .and_then(|s| parse_event_time(s, zone));
}

/// Start of the next day in the same offset.
fn ceiling(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let next = t.date_naive().and_time(NaiveTime::MIN) + Duration::days(1);
    t.offset()
        .from_local_datetime(&next)
        .single()
        .unwrap_or(t)
}

/// Last instant the event is still relevant: its end, else the end of its
/// start day. `None` when neither date is known.
pub fn latest_time(event: &Record) -> Option<DateTime<FixedOffset>> {
    event.ends_at.or_else(|| event.starts_at.map(ceiling))
}

/// Undated events are kept.
pub fn is_upcoming(event: &Record, now: DateTime<Utc>) -> bool {
    latest_time(event).map_or(true, |latest| latest > now)
}

pub fn filter_upcoming(events: Vec<Record>, now: DateTime<Utc>) -> Vec<Record> {
    events.into_iter().filter(|e| is_upcoming(e, now)).collect()
}

/// Start date ascending, undated events last, then the distance ordering.
pub fn by_start_then_distance(a: &Record, b: &Record) -> Ordering {
    let by_start = match (a.starts_at, b.starts_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_start.then_with(|| by_distance_then_name(a, b))
}

pub fn sort_events(events: &mut [Record]) {
    events.sort_by(by_start_then_distance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;

    fn event(id: &str, start: Option<&str>, end: Option<&str>, zone: Option<Tz>) -> Record {
        let mut e = Record::new(id, Source::Facebook).scheduled(start, end);
        apply_dates(&mut e, zone);
        e
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_timestamps_and_zoned_dates() {
        let ts = parse_event_time("2026-10-16T19:30:00-0400", None).unwrap();
        assert_eq!(ts.with_timezone(&Utc), utc("2026-10-16T23:30:00Z"));

        let ny = parse_time_zone("America/New_York");
        let d = parse_event_time("2026-10-16", ny).unwrap();
        assert_eq!(d.with_timezone(&Utc), utc("2026-10-16T04:00:00Z"));

        let plain = parse_event_time("2026-10-16", None).unwrap();
        assert_eq!(plain.with_timezone(&Utc), utc("2026-10-16T00:00:00Z"));

        assert!(parse_event_time("next friday", None).is_none());
        assert!(parse_event_time("2026-13-40", None).is_none());
        assert!(parse_time_zone("Mars/Olympus").is_none());
    }

    #[test]
    fn upcoming_uses_end_then_start_day() {
        let now = utc("2026-10-16T12:00:00Z");

        // ended an hour ago
        assert!(!is_upcoming(
            &event("1", Some("2026-10-16T08:00:00+0000"), Some("2026-10-16T11:00:00+0000"), None),
            now
        ));
        // started this morning, no end: alive until midnight
        assert!(is_upcoming(&event("2", Some("2026-10-16T08:00:00+0000"), None, None), now));
        // yesterday, no end
        assert!(!is_upcoming(&event("3", Some("2026-10-15"), None, None), now));
        // unparseable dates are kept
        assert!(is_upcoming(&event("4", Some("soon"), Some("later"), None), now));
        assert!(is_upcoming(&Record::new("5", Source::Facebook), now));
    }

    #[test]
    fn sorts_by_start_with_undated_last() {
        let mut a = event("late", Some("2026-10-20"), None, None);
        a.set_distance(Some(10));
        let mut b = event("early", Some("2026-10-18"), None, None);
        b.set_distance(Some(5_000));
        let mut c = event("undated-near", None, None, None);
        c.set_distance(Some(1));
        let mut d = event("same-day-near", Some("2026-10-18"), None, None);
        d.set_distance(Some(100));

        let mut all = vec![c, a, b, d];
        sort_events(&mut all);
        let ids: Vec<_> = all.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["same-day-near", "early", "late", "undated-near"]);
    }
}
