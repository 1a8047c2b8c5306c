//! Exponentially weighted moving average byte-rate estimator, used to
//! accompany `Progress` events during the Downloading phase (`spec` §4.G).

use std::time::Instant;

const WINDOW: std::time::Duration = std::time::Duration::from_secs(1);
const SMOOTHING: f64 = 0.3;

/// Tracks a smoothed bytes-per-second rate, sampled no more often than
/// once per one-second window.
pub struct RateEstimator {
    last_sample: Option<(Instant, u64)>,
    rate_bytes_per_sec: f64,
}

impl RateEstimator {
    /// Creates an estimator with no history yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_sample: None,
            rate_bytes_per_sec: 0.0,
        }
    }

    /// Records that `bytes_done` bytes have been transferred so far and
    /// returns the current smoothed rate. Only updates the smoothed value
    /// once a full one-second window has elapsed since the last update;
    /// otherwise returns the previous estimate unchanged.
    pub fn sample(&mut self, bytes_done: u64) -> f64 {
        let now = Instant::now();
        match self.last_sample {
            None => {
                self.last_sample = Some((now, bytes_done));
            }
            Some((last_instant, last_bytes)) => {
                let elapsed = now.duration_since(last_instant);
                if elapsed >= WINDOW {
                    let delta_bytes = bytes_done.saturating_sub(last_bytes) as f64;
                    let instantaneous = delta_bytes / elapsed.as_secs_f64();
                    self.rate_bytes_per_sec =
                        SMOOTHING * instantaneous + (1.0 - SMOOTHING) * self.rate_bytes_per_sec;
                    self.last_sample = Some((now, bytes_done));
                }
            }
        }
        self.rate_bytes_per_sec
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_does_not_change_rate() {
        let mut estimator = RateEstimator::new();
        assert_eq!(estimator.sample(1000), 0.0);
    }
}
