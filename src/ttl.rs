//! Date-based TTL policy.
//!
//! Content is assumed to settle over time: fresh posts get corrections,
//! month-old lyrics essentially never change. TTL grows with age in
//! fixed tiers.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Age bucket of a published entry, each mapping to one TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TtlTier {
    /// Under 6 hours old
    Fresh,
    /// Under 24 hours old
    SameDay,
    /// Under 3 days old
    Recent,
    /// Under 7 days old
    Week,
    /// Under 30 days old
    Month,
    /// 30 days and older
    Archive,
}

impl TtlTier {
    pub const ALL: [TtlTier; 6] = [
        TtlTier::Fresh,
        TtlTier::SameDay,
        TtlTier::Recent,
        TtlTier::Week,
        TtlTier::Month,
        TtlTier::Archive,
    ];

    /// Tier for content of the given age. Lower bounds are inclusive.
    pub fn for_age(age: Duration) -> Self {
        let secs = age.as_secs_f64();
        if secs < (6 * HOUR) as f64 {
            TtlTier::Fresh
        } else if secs < DAY as f64 {
            TtlTier::SameDay
        } else if secs < (3 * DAY) as f64 {
            TtlTier::Recent
        } else if secs < (7 * DAY) as f64 {
            TtlTier::Week
        } else if secs < (30 * DAY) as f64 {
            TtlTier::Month
        } else {
            TtlTier::Archive
        }
    }

    pub fn ttl(self) -> Duration {
        match self {
            TtlTier::Fresh => Duration::from_secs(2 * MINUTE),
            TtlTier::SameDay => Duration::from_secs(10 * MINUTE),
            TtlTier::Recent => Duration::from_secs(HOUR),
            TtlTier::Week => Duration::from_secs(6 * HOUR),
            TtlTier::Month => Duration::from_secs(DAY),
            TtlTier::Archive => Duration::from_secs(7 * DAY),
        }
    }

    /// Short label used in the stats histogram
    pub fn label(self) -> &'static str {
        match self {
            TtlTier::Fresh => "2min",
            TtlTier::SameDay => "10min",
            TtlTier::Recent => "1hour",
            TtlTier::Week => "6hour",
            TtlTier::Month => "24hour",
            TtlTier::Archive => "7days",
        }
    }
}

/// Tier for an entry published at `published`, as seen at `now`.
///
/// Timestamps in the future count as age zero.
pub fn tier_for_published(published: DateTime<Utc>, now: DateTime<Utc>) -> TtlTier {
    let age = (now - published).to_std().unwrap_or(Duration::ZERO);
    TtlTier::for_age(age)
}

/// TTL for an entry published at `published`, as seen at `now`.
pub fn ttl_for_published(published: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    tier_for_published(published, now).ttl()
}

/// Spread `ttl` uniformly within `±ratio` so a burst of posts does not
/// expire in lockstep. A ratio of zero returns `ttl` unchanged.
pub fn apply_jitter<R: Rng + ?Sized>(ttl: Duration, ratio: f64, rng: &mut R) -> Duration {
    if ratio <= 0.0 || ttl.is_zero() {
        return ttl;
    }
    let factor = rng.gen_range((1.0 - ratio)..=(1.0 + ratio));
    ttl.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ttl_at(age: TimeDelta) -> Duration {
        let now = Utc::now();
        ttl_for_published(now - age, now)
    }

    #[test]
    fn fresh_content_gets_two_minutes() {
        assert_eq!(ttl_at(TimeDelta::zero()), Duration::from_secs(120));
        assert_eq!(ttl_at(TimeDelta::hours(1)), Duration::from_secs(120));
    }

    #[test]
    fn six_hour_boundary_splits_tiers() {
        let below = ttl_at(TimeDelta::hours(6) - TimeDelta::seconds(1));
        let above = ttl_at(TimeDelta::hours(6) + TimeDelta::seconds(1));
        assert_eq!(below, Duration::from_secs(2 * 60));
        assert_eq!(above, Duration::from_secs(10 * 60));
        assert_ne!(below, above);
    }

    #[test]
    fn lower_bounds_are_inclusive() {
        assert_eq!(
            TtlTier::for_age(Duration::from_secs(6 * HOUR)),
            TtlTier::SameDay
        );
        assert_eq!(TtlTier::for_age(Duration::from_secs(DAY)), TtlTier::Recent);
        assert_eq!(TtlTier::for_age(Duration::from_secs(3 * DAY)), TtlTier::Week);
        assert_eq!(TtlTier::for_age(Duration::from_secs(7 * DAY)), TtlTier::Month);
        assert_eq!(
            TtlTier::for_age(Duration::from_secs(30 * DAY)),
            TtlTier::Archive
        );
    }

    #[test]
    fn each_tier_maps_to_documented_ttl() {
        assert_eq!(ttl_at(TimeDelta::hours(12)), Duration::from_secs(600));
        assert_eq!(ttl_at(TimeDelta::days(2)), Duration::from_secs(3600));
        assert_eq!(ttl_at(TimeDelta::days(5)), Duration::from_secs(6 * 3600));
        assert_eq!(ttl_at(TimeDelta::days(20)), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn old_content_gets_seven_days() {
        for days in [31, 90, 365, 3650] {
            assert_eq!(
                ttl_at(TimeDelta::days(days)),
                Duration::from_secs(7 * DAY),
                "age {} days",
                days
            );
        }
    }

    #[test]
    fn ttl_is_monotonic_in_age() {
        let mut last = Duration::ZERO;
        for tier in TtlTier::ALL {
            assert!(tier.ttl() > last);
            last = tier.ttl();
        }
    }

    #[test]
    fn future_publish_date_counts_as_fresh() {
        let now = Utc::now();
        assert_eq!(
            tier_for_published(now + TimeDelta::hours(3), now),
            TtlTier::Fresh
        );
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let mut rng = rand::thread_rng();
        let base = Duration::from_secs(1000);
        for _ in 0..200 {
            let jittered = apply_jitter(base, 0.1, &mut rng);
            assert!(jittered >= Duration::from_secs(900), "{:?}", jittered);
            assert!(jittered <= Duration::from_secs(1100), "{:?}", jittered);
        }
    }

    #[test]
    fn zero_jitter_is_identity() {
        let mut rng = rand::thread_rng();
        let base = Duration::from_secs(120);
        assert_eq!(apply_jitter(base, 0.0, &mut rng), base);
    }
}
