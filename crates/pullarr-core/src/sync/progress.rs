//! Rolling transfer-speed estimation for in-flight files.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(10);

/// Rolling speed sample over a short window of cumulative byte counts.
pub struct SpeedSample {
    window: VecDeque<(Instant, u64)>,
}

impl SpeedSample {
    pub fn new() -> Self {
        Self {
            window: VecDeque::new(),
        }
    }

    /// Record the current cumulative byte count.
    pub fn record(&mut self, total_bytes: u64) {
        let now = Instant::now();
        self.window.push_back((now, total_bytes));
        while let Some((t, _)) = self.window.front() {
            if now.duration_since(*t) > WINDOW && self.window.len() > 2 {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second over the sample window (0 until two samples exist).
    pub fn bytes_per_sec(&self) -> u64 {
        let (Some((t0, b0)), Some((t1, b1))) = (self.window.front(), self.window.back()) else {
            return 0;
        };
        let elapsed = t1.duration_since(*t0).as_secs_f64();
        if elapsed <= 0.0 || b1 <= b0 {
            return 0;
        }
        ((b1 - b0) as f64 / elapsed) as u64
    }
}

impl Default for SpeedSample {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rate_without_two_samples() {
        let mut s = SpeedSample::new();
        assert_eq!(s.bytes_per_sec(), 0);
        s.record(100);
        assert_eq!(s.bytes_per_sec(), 0);
    }

    #[test]
    fn rate_reflects_byte_delta() {
        let mut s = SpeedSample::new();
        s.record(0);
        std::thread::sleep(Duration::from_millis(50));
        s.record(1_000_000);
        let bps = s.bytes_per_sec();
        assert!(bps > 0, "rate should be positive, got {bps}");
    }
}
