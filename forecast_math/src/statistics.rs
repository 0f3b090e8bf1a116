//! Summary statistics

/// Arithmetic mean (`NaN` for an empty slice)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation with `n - 1` in the denominator
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let mu = mean(values);
    let variance =
        values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Standardized scores `(x - mean) / std`
///
/// A series with zero spread yields all zeros.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let mu = mean(values);
    let sigma = std_dev(values);
    if !sigma.is_finite() || sigma == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mu) / sigma).collect()
}
