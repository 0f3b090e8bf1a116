//! KPSS stationarity statistic

use crate::statistics::mean;

/// 5% critical value of the KPSS level-stationarity test
pub const KPSS_CRITICAL_VALUE_5PCT: f64 = 0.463;

/// KPSS statistic for the null hypothesis of level stationarity
///
/// Uses the short Newey-West bandwidth `trunc(3 * sqrt(n) / 13)` with
/// Bartlett weights. A series whose long-run variance is numerically zero
/// (e.g. a constant) is reported as `0.0`, i.e. stationary.
pub fn kpss_level_statistic(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let mu = mean(values);
    let residuals: Vec<f64> = values.iter().map(|v| v - mu).collect();

    let nf = n as f64;
    let lags = ((3.0 * nf.sqrt()) / 13.0).trunc() as usize;

    let mut long_run = residuals.iter().map(|e| e * e).sum::<f64>() / nf;
    for lag in 1..=lags.min(n - 1) {
        let weight = 1.0 - lag as f64 / (lags as f64 + 1.0);
        let autocov = residuals[lag..]
            .iter()
            .zip(&residuals[..n - lag])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / nf;
        long_run += 2.0 * weight * autocov;
    }

    let scale = 1.0 + values.iter().map(|v| v * v).sum::<f64>() / nf;
    if long_run <= 1e-20 * scale {
        return 0.0;
    }

    let mut partial = 0.0;
    let mut sum_sq = 0.0;
    for e in &residuals {
        partial += e;
        sum_sq += partial * partial;
    }

    sum_sq / (nf * nf * long_run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_is_not_level_stationary() {
        let trend: Vec<f64> = (0..100).map(|i| 100.0 + 0.5 * i as f64).collect();
        assert!(kpss_level_statistic(&trend) > KPSS_CRITICAL_VALUE_5PCT);
    }

    #[test]
    fn test_constant_is_stationary() {
        let flat = vec![0.5; 50];
        assert_eq!(kpss_level_statistic(&flat), 0.0);
    }

    #[test]
    fn test_periodic_series_is_stationary() {
        let pattern = [1.0, -0.5, -0.5];
        let wiggle: Vec<f64> = (0..201).map(|i| pattern[i % 3]).collect();
        assert!(kpss_level_statistic(&wiggle) < KPSS_CRITICAL_VALUE_5PCT);
    }
}
