use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window over which throughput is averaged.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Rolling throughput counter for one direction of one session.
///
/// Samples are timestamped byte counts; the rate is the windowed sum over
/// the last few seconds. Time is passed in by the caller so the estimator
/// stays deterministic under test.
#[derive(Debug, Default)]
pub struct RateEstimator {
    samples: VecDeque<(Instant, u64)>,
    window_bytes: u64,
    total_bytes: u64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `bytes` transferred at `now`.
    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
        self.window_bytes += bytes;
        self.total_bytes += bytes;
        self.evict(now);
    }

    /// Average bytes per second over the window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> u64 {
        self.evict(now);
        self.window_bytes / RATE_WINDOW.as_secs().max(1)
    }

    /// Bytes transferred over the whole session lifetime.
    pub fn total(&self) -> u64 {
        self.total_bytes
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.duration_since(at) <= RATE_WINDOW {
                break;
            }
            self.window_bytes -= bytes;
            self.samples.pop_front();
        }
    }
}
