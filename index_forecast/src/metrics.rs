//! Metrics for evaluating forecast performance

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

/// Forecast error metrics over a set of scored predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error, in percent
    pub mape: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Number of scored predictions
    pub count: usize,
}

impl std::fmt::Display for ErrorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RMSE {:.4}, MAPE {:.4}%, MAE {:.4} over {} predictions",
            self.rmse, self.mape, self.mae, self.count
        )
    }
}

/// Evaluate forecast accuracy against actual values
pub fn evaluate_forecast(forecast: &[f64], actual: &[f64]) -> Result<ErrorMetrics> {
    if forecast.len() != actual.len() || forecast.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "Forecast and actual values must have the same non-zero length".to_string(),
        ));
    }

    Ok(ErrorMetrics {
        rmse: root_mean_squared_error(forecast, actual),
        mape: mean_absolute_percentage_error(forecast, actual),
        mae: mean_absolute_error(forecast, actual),
        count: forecast.len(),
    })
}

/// Score `(predicted, actual)` pairs; `None` when there are none
pub fn evaluate_pairs<I>(pairs: I) -> Option<ErrorMetrics>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (forecast, actual): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
    evaluate_forecast(&forecast, &actual).ok()
}

pub fn root_mean_squared_error(forecast: &[f64], actual: &[f64]) -> f64 {
    if forecast.is_empty() {
        return f64::NAN;
    }
    let mse = forecast
        .iter()
        .zip(actual)
        .map(|(f, a)| (a - f).powi(2))
        .sum::<f64>()
        / forecast.len() as f64;
    mse.sqrt()
}

pub fn mean_absolute_error(forecast: &[f64], actual: &[f64]) -> f64 {
    if forecast.is_empty() {
        return f64::NAN;
    }
    forecast
        .iter()
        .zip(actual)
        .map(|(f, a)| (a - f).abs())
        .sum::<f64>()
        / forecast.len() as f64
}

/// MAPE in percent; zero actuals are skipped, and the result is 0 when no actual is non-zero
pub fn mean_absolute_percentage_error(forecast: &[f64], actual: &[f64]) -> f64 {
    let terms: Vec<f64> = forecast
        .iter()
        .zip(actual)
        .filter(|(_, a)| a.abs() > f64::EPSILON)
        .map(|(f, a)| ((a - f) / a).abs())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    terms.iter().sum::<f64>() / terms.len() as f64 * 100.0
}
