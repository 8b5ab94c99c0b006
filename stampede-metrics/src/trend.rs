use std::sync::Arc;

/// Nearest-rank percentile over an ascending slice.
///
/// Picks the element at `ceil(p/100 * n) - 1`, clamped to `[0, n-1]`, so the result is always
/// one of the samples. `p` outside `[0, 100]` is clamped.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }

    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    // Multiply before dividing so whole-number ranks (p95 of 20 samples) stay exact.
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    sorted.get(idx).copied()
}

/// Live trend series: every sample is retained so any percentile can be computed exactly.
#[derive(Debug, Clone, Default)]
pub struct Trend {
    samples: Vec<f64>,
    sum: f64,
}

impl Trend {
    pub fn push(&mut self, value: f64) {
        self.samples.push(value);
        self.sum += value;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copies the samples out. Sorting happens on the copy so the series lock is only held for
    /// the memcpy.
    pub fn snapshot(&self) -> TrendSnapshot {
        TrendSnapshot::from_unsorted(self.samples.clone(), self.sum)
    }
}

/// Immutable, sorted copy of a trend series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSnapshot {
    sorted: Arc<[f64]>,
    sum: f64,
}

impl TrendSnapshot {
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Self {
        let samples: Vec<f64> = samples.into_iter().collect();
        let sum = samples.iter().sum();
        Self::from_unsorted(samples, sum)
    }

    fn from_unsorted(mut samples: Vec<f64>, sum: f64) -> Self {
        samples.sort_unstable_by(f64::total_cmp);
        Self {
            sorted: Arc::from(samples),
            sum,
        }
    }

    pub fn merge(&self, other: &TrendSnapshot) -> TrendSnapshot {
        let mut merged = Vec::with_capacity(self.sorted.len() + other.sorted.len());
        let (mut i, mut j) = (0, 0);
        while i < self.sorted.len() && j < other.sorted.len() {
            if self.sorted[i].total_cmp(&other.sorted[j]).is_le() {
                merged.push(self.sorted[i]);
                i += 1;
            } else {
                merged.push(other.sorted[j]);
                j += 1;
            }
        }
        merged.extend_from_slice(&self.sorted[i..]);
        merged.extend_from_slice(&other.sorted[j..]);

        TrendSnapshot {
            sorted: Arc::from(merged),
            sum: self.sum + other.sum,
        }
    }

    pub fn count(&self) -> u64 {
        self.sorted.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.sorted
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn avg(&self) -> Option<f64> {
        (!self.sorted.is_empty()).then(|| self.sum / self.sorted.len() as f64)
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        nearest_rank(&self.sorted, p)
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            min: self.min(),
            max: self.max(),
            avg: self.avg(),
            med: self.percentile(50.0),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank_picks_expected_index() {
        let sorted: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(nearest_rank(&sorted, 95.0), Some(19.0));
        assert_eq!(nearest_rank(&sorted, 50.0), Some(10.0));
        assert_eq!(nearest_rank(&sorted, 5.0), Some(1.0));
        assert_eq!(nearest_rank(&sorted, 5.1), Some(2.0));
        assert_eq!(nearest_rank(&[], 50.0), None);
    }

    #[test]
    fn bounds_are_min_and_max() {
        let t = TrendSnapshot::from_samples([12.5, 3.0, 99.0, 41.0]);
        assert_eq!(t.percentile(0.0), t.min());
        assert_eq!(t.percentile(100.0), t.max());
        assert_eq!(t.percentile(250.0), Some(99.0));
        assert_eq!(t.percentile(-3.0), Some(3.0));
    }

    #[test]
    fn every_percentile_is_a_sample() {
        let raw = [7.0, 1.5, 300.25, 42.0, 42.0, 8.75, 19.0];
        let t = TrendSnapshot::from_samples(raw);
        for p in 0..=1000 {
            let p = f64::from(p) / 10.0;
            let v = t.percentile(p).unwrap_or_else(|| panic!("no value for p={p}"));
            assert!(raw.contains(&v), "p={p} returned {v}, not a sample");
        }
    }

    #[test]
    fn merge_keeps_order_and_sum() {
        let a = TrendSnapshot::from_samples([1.0, 5.0, 9.0]);
        let b = TrendSnapshot::from_samples([2.0, 6.0]);
        let m = a.merge(&b);
        assert_eq!(m.samples(), &[1.0, 2.0, 5.0, 6.0, 9.0]);
        assert_eq!(m.avg(), Some(23.0 / 5.0));
    }

    #[test]
    fn summary_of_empty_trend_has_no_stats() {
        let s = Trend::default().snapshot().summary();
        assert_eq!(s.count, 0);
        assert!(s.min.is_none());
        assert!(s.p95.is_none());
        assert!(s.avg.is_none());
    }
}
