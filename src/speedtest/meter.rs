use std::time::{Duration, Instant};

use super::ProgressSample;

/// Megabits per second for `bytes` moved over `elapsed`.
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}

/// Rolling byte counter shared by the download and upload samplers.
#[derive(Debug)]
pub struct ThroughputMeter {
    started: Instant,
    timeout: Duration,
    expected_bytes: Option<u64>,
    total: u64,
    last_tick: Instant,
    last_total: u64,
    last_percent: f64,
}

impl ThroughputMeter {
    pub fn new(started: Instant, timeout: Duration, expected_bytes: Option<u64>) -> Self {
        Self {
            started,
            timeout,
            expected_bytes: expected_bytes.filter(|&n| n > 0),
            total: 0,
            last_tick: started,
            last_total: 0,
            last_percent: 0.0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.total += bytes as u64;
    }

    /// For producers that count elsewhere (the upload body stream).
    pub fn set_total(&mut self, total: u64) {
        self.total = self.total.max(total);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Closes the current epoch and returns its sample.
    pub fn tick(&mut self, now: Instant) -> ProgressSample {
        let interval = now.saturating_duration_since(self.last_tick);
        let delta = self.total - self.last_total;
        let sample = ProgressSample {
            speed_mbps: mbps(delta, interval),
            elapsed_percent: self.percent(now),
            elapsed: now.saturating_duration_since(self.started),
            latency_ms: None,
        };
        self.last_tick = now;
        self.last_total = self.total;
        sample
    }

    /// Average throughput over the whole test and its duration.
    pub fn finish(&self, now: Instant) -> (f64, Duration) {
        let elapsed = now.saturating_duration_since(self.started);
        (mbps(self.total, elapsed), elapsed)
    }

    fn percent(&mut self, now: Instant) -> f64 {
        let by_time = if self.timeout.is_zero() {
            0.0
        } else {
            now.saturating_duration_since(self.started).as_secs_f64() / self.timeout.as_secs_f64()
        };
        let by_bytes = self
            .expected_bytes
            .map(|expected| self.total as f64 / expected as f64)
            .unwrap_or(0.0);

        let percent = (by_time.max(by_bytes) * 100.0).clamp(0.0, 100.0);
        self.last_percent = self.last_percent.max(percent);
        self.last_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_formula() {
        // 10 MB in 4 s is 20 Mbps
        let speed = mbps(10_000_000, Duration::from_secs(4));
        assert!((speed - 20.0).abs() < 1e-9);
    }

    #[test]
    fn mbps_never_negative_or_nan() {
        assert_eq!(mbps(0, Duration::from_secs(1)), 0.0);
        assert_eq!(mbps(1_000, Duration::ZERO), 0.0);
    }

    #[test]
    fn tick_measures_the_epoch_only() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0, Duration::from_secs(10), None);

        meter.record(1_000_000);
        let first = meter.tick(t0 + Duration::from_secs(1));
        assert!((first.speed_mbps - 8.0).abs() < 1e-9);

        meter.record(250_000);
        let second = meter.tick(t0 + Duration::from_secs(2));
        assert!((second.speed_mbps - 2.0).abs() < 1e-9);
        assert!(second.elapsed > first.elapsed);
    }

    #[test]
    fn idle_epoch_reports_zero() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0, Duration::from_secs(10), None);
        meter.record(500);
        meter.tick(t0 + Duration::from_millis(500));
        let idle = meter.tick(t0 + Duration::from_secs(1));
        assert_eq!(idle.speed_mbps, 0.0);
    }

    #[test]
    fn percent_uses_time_or_bytes_and_clamps() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0, Duration::from_secs(10), Some(1_000));

        meter.record(500);
        let half = meter.tick(t0 + Duration::from_secs(1));
        assert!((half.elapsed_percent - 50.0).abs() < 1e-9);

        let by_time = meter.tick(t0 + Duration::from_secs(7));
        assert!((by_time.elapsed_percent - 70.0).abs() < 1e-9);

        let late = meter.tick(t0 + Duration::from_secs(30));
        assert_eq!(late.elapsed_percent, 100.0);
    }

    #[test]
    fn set_total_does_not_go_backwards() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0, Duration::from_secs(1), None);
        meter.set_total(4_096);
        meter.set_total(1_024);
        assert_eq!(meter.total(), 4_096);
    }

    #[test]
    fn finish_averages_over_total_elapsed() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0, Duration::from_secs(5), None);
        meter.record(2_500_000);
        let (speed, elapsed) = meter.finish(t0 + Duration::from_secs(2));
        assert_eq!(elapsed, Duration::from_secs(2));
        assert!((speed - 10.0).abs() < 1e-9);
    }
}
