//! Scalar reductions over one pixel's samples

/// Median of the values; even counts average the two central values.
/// NaN for an empty slice. Reorders `values`.
pub fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Arithmetic mean, NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean, minimum and maximum of a series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesSummary {
    /// Summary over the non-NaN values, `None` if there are none
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut n = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values.into_iter().filter(|v| !v.is_nan()) {
            n += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (n > 0).then(|| SeriesSummary {
            mean: sum / n as f64,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&mut []).is_nan());
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
        assert!(mean(&[]).is_nan());
    }

    #[test]
    fn test_series_summary_skips_nan() {
        let s = SeriesSummary::of([2.0, f64::NAN, 4.0, 0.0]).unwrap();
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 4.0);
        assert!(SeriesSummary::of([f64::NAN]).is_none());
    }
}
