//! Moving-average timing for reader and batch costs.

use std::time::Duration;

/// Accumulates elapsed time over a window of samples and reports the
/// per-sample average. The driver keeps two of these, one for data loading
/// and one for whole-iteration cost, resetting both every iteration.
#[derive(Debug, Default)]
pub struct TimeAverager {
    total: Duration,
    samples: usize,
}

impl TimeAverager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.record_samples(elapsed, 1);
    }

    pub fn record_samples(&mut self, elapsed: Duration, num_samples: usize) {
        self.total += elapsed;
        self.samples += num_samples.max(1);
    }

    /// Per-sample average over the current window; zero before any record.
    pub fn average(&self) -> Duration {
        if self.samples == 0 {
            Duration::ZERO
        } else {
            self.total / self.samples as u32
        }
    }

    pub fn reset(&mut self) {
        self.total = Duration::ZERO;
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_per_sample() {
        let mut avg = TimeAverager::new();
        avg.record_samples(Duration::from_millis(300), 3);
        assert_eq!(avg.average(), Duration::from_millis(100));
    }

    #[test]
    fn empty_window_averages_zero() {
        assert_eq!(TimeAverager::new().average(), Duration::ZERO);
    }

    #[test]
    fn reset_clears_the_window() {
        let mut avg = TimeAverager::new();
        avg.record(Duration::from_millis(50));
        avg.reset();
        assert_eq!(avg.average(), Duration::ZERO);
        avg.record(Duration::from_millis(20));
        assert_eq!(avg.average(), Duration::from_millis(20));
    }
}
