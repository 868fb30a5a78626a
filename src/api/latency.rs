//! In-memory latency histograms for collaborator calls (semantic filter, reasoning).

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. Callers record, API and reporter read.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Percentiles {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1us to 1000s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 1_000_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 1_000_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn percentiles(&self) -> Percentiles {
        let Ok(h) = self.inner.lock() else {
            return Percentiles::default();
        };
        if h.len() == 0 {
            return Percentiles::default();
        }
        Percentiles {
            samples: h.len(),
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
        }
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let p = LatencyStats::new().percentiles();
        assert_eq!(p.samples, 0);
        assert!(p.p50_us.is_none());
    }

    #[test]
    fn records_and_reports() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let p = stats.percentiles();
        assert_eq!(p.samples, 100);
        let p50 = p.p50_us.unwrap();
        assert!((49_000..=51_000).contains(&p50), "p50={p50}");
        assert!(p.p99_us.unwrap() >= p50);
    }

    #[test]
    fn zero_duration_is_recorded() {
        let stats = LatencyStats::new();
        stats.record(Duration::ZERO);
        assert_eq!(stats.len(), 1);
    }
}
