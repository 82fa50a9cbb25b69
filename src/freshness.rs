//! # Freshness policy
//! The single gate between "serve from cache" and "go fetch". Pure, no I/O.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::model::Ingest;

#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    /// `None` when the window is too large to represent: nothing ever expires.
    window: Option<ChronoDuration>,
}

impl FreshnessPolicy {
    /// `window_days` < 0 is treated as 0 (everything is stale immediately).
    pub fn new(window_days: i64) -> Self {
        Self {
            window: ChronoDuration::try_days(window_days.max(0)),
        }
    }

    pub fn window(&self) -> Option<ChronoDuration> {
        self.window
    }

    /// True when the cached set cannot answer a query for `requested_radius`
    /// meters at `now`: no ingest yet, a smaller covered radius, or expired.
    pub fn needs_refetch(
        &self,
        ingest: Option<&Ingest>,
        requested_radius: u32,
        now: DateTime<Utc>,
    ) -> bool {
        match ingest {
            None => true,
            Some(i) => i.distance < requested_radius || self.expired(i.last_updated, now),
        }
    }

    fn expired(&self, last_updated: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // an expiry past the end of representable time never arrives
        self.window
            .and_then(|w| last_updated.checked_add_signed(w))
            .is_some_and(|expiry| expiry < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IngestKey;
    use chrono::TimeZone;

    fn ingest(distance: u32, updated: DateTime<Utc>) -> Ingest {
        Ingest::new(IngestKey::zip("10001", "US"), updated).with_distance(distance)
    }

    #[test]
    fn absent_ingest_needs_refetch() {
        let p = FreshnessPolicy::new(30);
        assert!(p.needs_refetch(None, 5_000, Utc::now()));
    }

    #[test]
    fn covered_radius_within_window_is_served_from_cache() {
        let p = FreshnessPolicy::new(30);
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let i = ingest(5_000, t0);
        for radius in [0, 1, 3_000, 5_000] {
            assert!(!p.needs_refetch(Some(&i), radius, t0 + ChronoDuration::days(29)));
        }
        // boundary: exactly at the window end is still fresh
        assert!(!p.needs_refetch(Some(&i), 5_000, t0 + ChronoDuration::days(30)));
    }

    #[test]
    fn larger_radius_needs_refetch() {
        let p = FreshnessPolicy::new(30);
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(p.needs_refetch(Some(&ingest(5_000, t0)), 5_001, t0));
    }

    #[test]
    fn stale_ingest_needs_refetch_regardless_of_distance() {
        let p = FreshnessPolicy::new(30);
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let later = t0 + ChronoDuration::days(30) + ChronoDuration::seconds(1);
        for distance in [0, 5_000, u32::MAX] {
            assert!(p.needs_refetch(Some(&ingest(distance, t0)), 0, later));
        }
    }

    #[test]
    fn huge_window_never_expires_and_does_not_overflow() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let i = ingest(5_000, t0);
        for days in [100_000_000, i64::MAX] {
            let p = FreshnessPolicy::new(days);
            assert!(!p.needs_refetch(Some(&i), 5_000, t0 + ChronoDuration::days(365)));
        }
        // a representable window whose expiry lies past the calendar end
        let near_end = ingest(5_000, DateTime::<Utc>::MAX_UTC - ChronoDuration::days(1));
        assert!(!FreshnessPolicy::new(30).needs_refetch(Some(&near_end), 0, DateTime::<Utc>::MAX_UTC));
    }
}
