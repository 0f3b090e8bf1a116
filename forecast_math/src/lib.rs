//! # Forecast Math
//!
//! Numerical building blocks shared by the forecasting models.
//! This crate provides the small pieces of linear algebra and time series
//! statistics that the ARIMA and LSTM forecasters are assembled from.

use thiserror::Error;

pub mod distribution;
pub mod linalg;
pub mod scaling;
pub mod stationarity;
pub mod statistics;
pub mod transforms;

/// Errors that can occur in numerical calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for numerical operations
pub type Result<T> = std::result::Result<T, MathError>;

pub use distribution::{normal_quantile, z_for_confidence};
pub use linalg::least_squares;
pub use scaling::MinMaxScaler;
pub use stationarity::{kpss_level_statistic, KPSS_CRITICAL_VALUE_5PCT};
pub use statistics::{mean, std_dev, z_scores};
pub use transforms::{difference, integrate_one_step, last_levels};
