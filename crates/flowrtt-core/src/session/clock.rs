use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use time::{Duration, OffsetDateTime};

use crate::segment::Timestamp;

/// Capture-time clock shared by a pool and its session workers.
///
/// `now` is the newest capture timestamp observed, advanced by the wall time
/// elapsed since it was observed. Live captures therefore track the wall
/// clock while offline replays follow the capture.
#[derive(Debug)]
pub struct CaptureClock {
    base: Instant,
    started: AtomicBool,
    latest_nanos: AtomicI64,
    observed_at_nanos: AtomicU64,
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            started: AtomicBool::new(false),
            latest_nanos: AtomicI64::new(i64::MIN),
            observed_at_nanos: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ts: Timestamp) {
        self.latest_nanos.fetch_max(to_nanos(ts), Ordering::AcqRel);
        self.observed_at_nanos
            .store(self.elapsed_nanos(), Ordering::Release);
        self.started.store(true, Ordering::Release);
    }

    /// `None` until the first observation.
    pub fn now(&self) -> Option<Timestamp> {
        if !self.started.load(Ordering::Acquire) {
            return None;
        }
        let latest = from_nanos(self.latest_nanos.load(Ordering::Acquire));
        let since = self
            .elapsed_nanos()
            .saturating_sub(self.observed_at_nanos.load(Ordering::Acquire));
        Some(latest + Duration::nanoseconds(since.min(i64::MAX as u64) as i64))
    }

    fn elapsed_nanos(&self) -> u64 {
        self.base.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64
    }
}

pub(crate) fn to_nanos(ts: Timestamp) -> i64 {
    ts.unix_timestamp_nanos()
        .clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

pub(crate) fn from_nanos(nanos: i64) -> Timestamp {
    OffsetDateTime::UNIX_EPOCH + Duration::nanoseconds(nanos)
}

#[cfg(test)]
mod tests {
    use super::{CaptureClock, from_nanos, to_nanos};
    use time::{Duration, OffsetDateTime};

    #[test]
    fn unset_clock_has_no_time() {
        assert!(CaptureClock::new().now().is_none());
    }

    #[test]
    fn clock_follows_newest_capture_time() {
        let clock = CaptureClock::new();
        let t0 = OffsetDateTime::UNIX_EPOCH + Duration::days(1);
        clock.observe(t0 + Duration::minutes(10));
        clock.observe(t0);
        let now = clock.now().unwrap();
        assert!(now >= t0 + Duration::minutes(10));
        assert!(now < t0 + Duration::minutes(11));
    }

    #[test]
    fn nanos_round_trip() {
        let ts = OffsetDateTime::UNIX_EPOCH + Duration::nanoseconds(1_234_567_890_123);
        assert_eq!(from_nanos(to_nanos(ts)), ts);
    }
}
