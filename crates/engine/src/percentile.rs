/// Nearest-rank percentile of `durations` at `p` in `[0, 1]`.
///
/// Sorts a private copy; the caller's slice is left untouched. Returns 0 for an
/// empty sample.
pub fn percentile(durations: &[i64], p: f64) -> i64 {
    if durations.is_empty() {
        return 0;
    }
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    sorted[nearest_rank(sorted.len(), p)]
}

fn nearest_rank(n: usize, p: f64) -> usize {
    let rank = (p * n as f64).ceil() as i64 - 1;
    rank.clamp(0, n as i64 - 1) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Percentiles {
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
}

impl Percentiles {
    /// Sorts once and reads all three ranks; same results as three `percentile` calls.
    pub fn from_samples(durations: &[i64]) -> Self {
        if durations.is_empty() {
            return Self::default();
        }
        let mut sorted = durations.to_vec();
        sorted.sort_unstable();
        let at = |p: f64| sorted[nearest_rank(sorted.len(), p)];
        Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}
