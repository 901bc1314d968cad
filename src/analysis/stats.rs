//! Numeric summaries
//!
//! Mean and deviation go through Trueno's SIMD vectors; Trueno has no
//! percentile function, so percentiles interpolate linearly between the two
//! nearest ranks of the sorted sample.
//!
//! Trueno vectors are `f32`. Samples are centered on their median before the
//! conversion, so large timestamps or core-second totals keep their spread;
//! the mean is shifted back in `f64`.

use serde::{Deserialize, Serialize};

/// Summary of one metric over a group of jobs or workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Interpolated percentile of sorted data, `pct` in `[0, 100]`
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let index = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = index - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Summarize a sample; `None` when it is empty
pub fn summarize(values: &[f64]) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(&sorted, 50.0);

    let centered: Vec<f32> = values.iter().map(|&v| (v - median) as f32).collect();
    let v = trueno::Vector::from_slice(&centered);
    let mean = median + v.mean().unwrap_or(0.0) as f64;
    // E[X^2] - mean^2 can dip below zero by rounding
    let std = (v.variance().unwrap_or(0.0).max(0.0) as f64).sqrt();

    Some(NumericSummary {
        count: values.len(),
        // exact extrema from the sorted f64 data
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        std,
        median,
        p25: percentile(&sorted, 25.0),
        p75: percentile(&sorted, 75.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&sorted, 50.0), 30.0);
        assert_eq!(percentile(&sorted, 25.0), 20.0);
        assert!((percentile(&sorted, 90.0) - 46.0).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&sorted, 100.0), 50.0);
    }

    #[test]
    fn test_percentile_edge_cases() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn test_summarize() {
        let s = summarize(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(s.count, 4);
        assert_eq!((s.min, s.max), (1.0, 4.0));
        assert!((s.mean - 2.5).abs() < 1e-5);
        assert!((s.median - 2.5).abs() < 1e-9);
        assert!(s.std > 0.0);
    }

    #[test]
    fn test_summarize_constant_and_empty() {
        let s = summarize(&[5.0, 5.0, 5.0]).unwrap();
        assert!((s.mean - 5.0).abs() < 1e-5);
        assert!(s.std.abs() < 1e-5);
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_summarize_keeps_spread_of_large_values() {
        // f32 spacing at 1e9 is 64, so uncentered these would all collapse
        let s = summarize(&[1e9, 1e9 + 1.0, 1e9 + 2.0, 1e9 + 3.0]).unwrap();
        assert!((s.mean - (1e9 + 1.5)).abs() < 1e-3, "mean {}", s.mean);
        assert!((s.std - 1.25f64.sqrt()).abs() < 1e-4, "std {}", s.std);
        assert_eq!((s.min, s.max), (1e9, 1e9 + 3.0));
    }
}
