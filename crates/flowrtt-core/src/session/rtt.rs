use time::Duration;

use crate::RttSummary;

/// Running round-trip statistics of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RttStats {
    first: Option<Duration>,
    min: Duration,
    max: Duration,
    total: Duration,
    count: u64,
}

impl RttStats {
    /// Fold one sample in. Negative samples are rejected and `false` is
    /// returned.
    pub fn record(&mut self, rtt: Duration) -> bool {
        if rtt.is_negative() {
            return false;
        }
        if self.first.is_none() {
            self.first = Some(rtt);
            self.min = rtt;
            self.max = rtt;
        } else {
            self.min = self.min.min(rtt);
            self.max = self.max.max(rtt);
        }
        self.total += rtt;
        self.count += 1;
        true
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn first(&self) -> Option<Duration> {
        self.first
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let nanos = self.total.whole_nanoseconds() / i128::from(self.count);
        Some(Duration::nanoseconds(nanos as i64))
    }

    pub fn summary(&self) -> Option<RttSummary> {
        let first = self.first?;
        let mean = self.mean()?;
        Some(RttSummary {
            first_us: micros(first),
            min_us: micros(self.min),
            max_us: micros(self.max),
            avg_us: micros(mean),
            samples: self.count,
        })
    }
}

fn micros(duration: Duration) -> i64 {
    duration.whole_microseconds() as i64
}

#[cfg(test)]
mod tests {
    use super::RttStats;
    use time::Duration;

    #[test]
    fn first_min_max_mean() {
        let mut stats = RttStats::default();
        assert!(stats.summary().is_none());
        assert!(stats.record(Duration::milliseconds(30)));
        assert!(stats.record(Duration::milliseconds(10)));
        assert!(stats.record(Duration::milliseconds(20)));

        let summary = stats.summary().unwrap();
        assert_eq!(summary.first_us, 30_000);
        assert_eq!(summary.min_us, 10_000);
        assert_eq!(summary.max_us, 30_000);
        assert_eq!(summary.avg_us, 20_000);
        assert_eq!(summary.samples, 3);
    }

    #[test]
    fn negative_samples_are_not_counted() {
        let mut stats = RttStats::default();
        assert!(!stats.record(Duration::microseconds(-1)));
        assert_eq!(stats.count(), 0);
        assert!(stats.first().is_none());
    }

    #[test]
    fn zero_is_a_valid_sample() {
        let mut stats = RttStats::default();
        assert!(stats.record(Duration::ZERO));
        assert_eq!(stats.summary().unwrap().max_us, 0);
    }
}
