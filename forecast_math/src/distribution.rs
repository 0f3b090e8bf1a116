//! Gaussian quantiles for forecast intervals

use crate::{MathError, Result};
use statrs::distribution::{ContinuousCDF, Normal};

/// Inverse CDF of the standard normal distribution
pub fn normal_quantile(p: f64) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(MathError::InvalidInput(format!(
            "Probability must be in (0, 1), got {}",
            p
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| MathError::CalculationError(format!("Normal distribution: {}", e)))?;
    Ok(normal.inverse_cdf(p))
}

/// Two-sided critical value for a confidence level, e.g. 1.96 for 0.95
pub fn z_for_confidence(confidence_level: f64) -> Result<f64> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(MathError::InvalidInput(
            "Confidence level must be between 0 and 1".to_string(),
        ));
    }
    normal_quantile((1.0 + confidence_level) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_common_levels() {
        assert_relative_eq!(z_for_confidence(0.95).unwrap(), 1.959964, epsilon = 1e-4);
        assert_relative_eq!(z_for_confidence(0.99).unwrap(), 2.575829, epsilon = 1e-4);
        assert_relative_eq!(z_for_confidence(0.90).unwrap(), 1.644854, epsilon = 1e-4);
    }

    #[test]
    fn test_invalid_levels() {
        assert!(z_for_confidence(0.0).is_err());
        assert!(z_for_confidence(1.0).is_err());
        assert!(normal_quantile(f64::NAN).is_err());
    }
}
