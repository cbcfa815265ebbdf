//! Fixed-capacity ring buffer with O(1) incremental statistics.
//!
//! A `VecDeque`-backed FIFO that keeps a running sum/sum-of-squares
//! alongside the samples so `mean`/`std` stay O(1), plus lifetime
//! min/max that are **not** corrected on eviction (see the struct docs
//! below — this is a deliberate approximation, not an oversight).

use std::collections::VecDeque;
use std::sync::Mutex;

/// Single-writer ring buffer of `f64` samples with incremental statistics.
///
/// Intended for use inside a caller-held lock (e.g. `FlowTracker`'s flow
/// table mutex protects the rings embedded in each `Flow`). For use from
/// multiple threads without an outer lock, see [`SharedStatsWindow`].
///
/// `min_value`/`max_value` are updated whenever an appended sample is more
/// extreme, but are **never corrected when the extreme sample is evicted**.
/// They therefore report the smallest/largest value seen since the window
/// was created or last [`reset`](StatsWindow::reset), not necessarily a
/// bound on the values currently in the window.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    capacity: usize,
    values: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl StatsWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "StatsWindow capacity must be > 0");
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// O(1) append. Evicts the oldest sample when at capacity, adjusting
    /// `sum`/`sum_sq` in O(1); `min`/`max` are only ever widened, never
    /// recomputed from the surviving window.
    pub fn append(&mut self, v: f64) {
        if self.values.len() == self.capacity {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.values.push_back(v);
        self.sum += v;
        self.sum_sq += v * v;
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    /// Population variance of the current window.
    pub fn variance(&self) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / n as f64 - mean * mean).max(0.0)
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// `None` if the window is empty (and thus has never recorded a value).
    pub fn min_value(&self) -> Option<f64> {
        if self.values.is_empty() && self.min.is_infinite() {
            None
        } else {
            Some(self.min)
        }
    }

    pub fn max_value(&self) -> Option<f64> {
        if self.values.is_empty() && self.max.is_infinite() {
            None
        } else {
            Some(self.max)
        }
    }

    /// O(n log n): sorts a copy of the current window and interpolates
    /// nothing — nearest-rank percentile.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// Most recent `n` samples, oldest-first.
    pub fn recent(&self, n: usize) -> Vec<f64> {
        let len = self.values.len();
        let skip = len.saturating_sub(n);
        self.values.iter().skip(skip).copied().collect()
    }

    /// Resets sums and samples; this is the only way `min`/`max` are
    /// recomputed (to infinities, i.e. "unknown") rather than widened.
    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
    }
}

/// Thread-safe wrapper around [`StatsWindow`] for rings shared across
/// threads without an outer lock already protecting them (e.g. the
/// per-interface latency/jitter rings owned by the pipeline worker but
/// read concurrently by API handlers via `MetricsStore`).
#[derive(Debug)]
pub struct SharedStatsWindow {
    inner: Mutex<StatsWindow>,
}

impl SharedStatsWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StatsWindow::new(capacity)),
        }
    }

    pub fn append(&self, v: f64) {
        self.inner.lock().unwrap().append(v);
    }

    pub fn snapshot(&self) -> StatsWindow {
        self.inner.lock().unwrap().clone()
    }

    pub fn mean(&self) -> f64 {
        self.inner.lock().unwrap().mean()
    }

    pub fn percentile(&self, p: f64) -> f64 {
        self.inner.lock().unwrap().percentile(p)
    }

    pub fn recent(&self, n: usize) -> Vec<f64> {
        self.inner.lock().unwrap().recent(n)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity() {
        let mut w = StatsWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            w.append(v);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.values(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn mean_matches_sum_over_n() {
        let mut w = StatsWindow::new(5);
        for v in [10.0, 20.0, 30.0] {
            w.append(v);
        }
        assert!((w.mean() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn min_max_not_corrected_on_eviction() {
        let mut w = StatsWindow::new(2);
        w.append(1.0);
        w.append(100.0);
        // evicts 1.0, leaving [100.0, 5.0] — but min stays 1.0
        w.append(5.0);
        assert_eq!(w.min_value(), Some(1.0));
        assert_eq!(w.max_value(), Some(100.0));
        assert_eq!(w.values(), vec![100.0, 5.0]);
    }

    #[test]
    fn empty_window_has_no_min_max() {
        let w = StatsWindow::new(4);
        assert_eq!(w.min_value(), None);
        assert_eq!(w.max_value(), None);
        assert_eq!(w.mean(), 0.0);
    }

    #[test]
    fn reset_clears_extremes() {
        let mut w = StatsWindow::new(4);
        w.append(10.0);
        w.reset();
        assert_eq!(w.min_value(), None);
        assert_eq!(w.len(), 0);
    }

    #[test]
    fn percentile_nearest_rank() {
        let mut w = StatsWindow::new(10);
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            w.append(v);
        }
        assert_eq!(w.percentile(50.0), 30.0);
        assert_eq!(w.percentile(100.0), 50.0);
        assert_eq!(w.percentile(0.0), 10.0);
    }
}
