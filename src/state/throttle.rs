//! Per-channel topic rate limiting for ambient replies.
//!
//! A throttle map stores, per topic, the instant the topic last fired.
//! Explicit commands never go through here.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Longest window a throttle may be set to, about ten years.
pub const MAX_THROTTLE_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Source of "now", injectable so throttle windows can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Check `topic` and arm it when it is free.
///
/// First sighting records `now` and is not throttled. Within `interval` of the
/// recorded instant the topic is throttled; after it, the timer restarts and
/// the topic is free again.
pub fn check_and_arm(
    throttles: &mut BTreeMap<String, DateTime<Utc>>,
    topic: &str,
    now: DateTime<Utc>,
    interval: Duration,
) -> bool {
    match throttles.get(topic) {
        Some(last) if now.signed_duration_since(*last) < interval => true,
        _ => {
            throttles.insert(topic.to_string(), now);
            false
        }
    }
}

/// Make `topic` stay throttled for exactly `secs` seconds from `now`.
pub fn set_override(
    throttles: &mut BTreeMap<String, DateTime<Utc>>,
    topic: &str,
    now: DateTime<Utc>,
    secs: i64,
    interval: Duration,
) {
    let shifted = now + Duration::seconds(secs.clamp(0, MAX_THROTTLE_SECS)) - interval;
    throttles.insert(topic.to_string(), shifted);
}

/// Whole seconds until `last` stops throttling, never negative.
pub fn remaining_secs(last: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> i64 {
    let left = interval - now.signed_duration_since(last);
    if left <= Duration::zero() {
        return 0;
    }
    let whole = left.num_seconds();
    if left > Duration::seconds(whole) {
        whole + 1
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_check_is_free_second_is_throttled() {
        let clock = ManualClock::new(start());
        let interval = Duration::seconds(1800);
        let mut map = BTreeMap::new();

        assert!(!check_and_arm(&mut map, "trivia", clock.now(), interval));
        assert!(check_and_arm(&mut map, "trivia", clock.now(), interval));

        clock.advance(Duration::seconds(1799));
        assert!(check_and_arm(&mut map, "trivia", clock.now(), interval));

        clock.advance(Duration::seconds(1));
        assert!(!check_and_arm(&mut map, "trivia", clock.now(), interval));
        // timer restarted
        assert!(check_and_arm(&mut map, "trivia", clock.now(), interval));
    }

    #[test]
    fn topics_are_independent() {
        let interval = Duration::seconds(60);
        let mut map = BTreeMap::new();
        assert!(!check_and_arm(&mut map, "python", start(), interval));
        assert!(!check_and_arm(&mut map, "drwho", start(), interval));
        assert!(check_and_arm(&mut map, "python", start(), interval));
    }

    #[test]
    fn override_holds_for_requested_seconds() {
        let clock = ManualClock::new(start());
        let interval = Duration::seconds(1800);
        let mut map = BTreeMap::new();

        set_override(&mut map, "stern", clock.now(), 10, interval);
        assert_eq!(remaining_secs(map["stern"], clock.now(), interval), 10);

        clock.advance(Duration::seconds(9));
        assert!(check_and_arm(&mut map, "stern", clock.now(), interval));
        clock.advance(Duration::seconds(1));
        assert!(!check_and_arm(&mut map, "stern", clock.now(), interval));
    }

    #[test]
    fn override_longer_than_interval() {
        let interval = Duration::seconds(60);
        let mut map = BTreeMap::new();
        set_override(&mut map, "wutang", start(), 3600, interval);
        let later = start() + Duration::seconds(3000);
        assert!(check_and_arm(&mut map, "wutang", later, interval));
    }

    #[test]
    fn remaining_rounds_up_and_clamps() {
        let interval = Duration::seconds(100);
        let last = start();
        let now = start() + Duration::milliseconds(10_500);
        assert_eq!(remaining_secs(last, now, interval), 90);
        assert_eq!(remaining_secs(last, start() + Duration::seconds(500), interval), 0);
    }

    #[test]
    fn manual_clock_set() {
        let clock = ManualClock::new(start());
        let later = start() + Duration::hours(2);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
