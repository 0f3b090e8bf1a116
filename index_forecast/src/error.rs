//! Error types for the index_forecast crate

use chrono::NaiveDate;
use forecast_math::MathError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Custom error types for the index_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A trading day is missing inside the modeled range
    #[error("Data gap: no price record for trading day {date}")]
    DataGap { date: NaiveDate },

    /// An auxiliary regressor has no value for a kept trading day
    #[error("Feature alignment error: regressor '{regressor}' has no value on {date}")]
    FeatureAlignment { date: NaiveDate, regressor: String },

    /// Not enough rows before the cutoff for the requested model input
    #[error("Insufficient history: need {required} rows, only {available} available")]
    InsufficientHistory { required: usize, available: usize },

    /// Statistical fit did not converge within the iteration budget
    #[error("Convergence error for {order}: {reason}")]
    Convergence { order: String, reason: String },

    /// The realized value for a date has not been released yet
    #[error("Actual value for {date} is not yet available")]
    ActualUnavailable { date: NaiveDate },

    /// The raw table contains the same date twice
    #[error("Duplicate date in price table: {0}")]
    DuplicateDate(NaiveDate),

    /// A required column is absent from the raw table
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A forecast was requested for a weekend or holiday
    #[error("{0} is not a trading day")]
    NonTradingDay(NaiveDate),

    /// No usable rows remain after preprocessing
    #[error("Price series is empty")]
    EmptySeries,

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The caller stopped the walk-forward run
    #[error("Evaluation cancelled before {date}")]
    Cancelled { date: NaiveDate },

    /// A fatal error stopped the walk-forward run at a cutoff date
    #[error("Walk-forward run aborted at {date}: {source}")]
    Aborted {
        date: NaiveDate,
        #[source]
        source: Box<ForecastError>,
    },

    /// Error from numerical kernels
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error reading or writing CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error reading or writing JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl ForecastError {
    /// Whether this error must abort a walk-forward run
    ///
    /// Local errors only invalidate the prediction of one model for one
    /// field at one date. `DataError` is local because models raise it for
    /// non-finite fits and forecasts.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ForecastError::InsufficientHistory { .. }
                | ForecastError::Convergence { .. }
                | ForecastError::ActualUnavailable { .. }
                | ForecastError::DataError(_)
                | ForecastError::Math(_)
        )
    }

    /// Wrap a fatal error with the cutoff date it occurred at
    pub fn aborted_at(self, date: NaiveDate) -> Self {
        match self {
            ForecastError::Aborted { .. } | ForecastError::Cancelled { .. } => self,
            other => ForecastError::Aborted {
                date,
                source: Box::new(other),
            },
        }
    }
}

/// Per-record tag explaining why a prediction is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorTag {
    /// Not enough rows before the cutoff date
    InsufficientHistory,
    /// The statistical fit failed, including the simplified retry
    ConvergenceFailure,
    /// No fitted model state exists yet for this slot
    ModelUnavailable,
    /// Any other local failure while fitting or predicting
    PredictionFailed,
}

impl ErrorTag {
    /// Classify a local error
    pub fn from_error(error: &ForecastError) -> Self {
        match error {
            ForecastError::InsufficientHistory { .. } => ErrorTag::InsufficientHistory,
            ForecastError::Convergence { .. } => ErrorTag::ConvergenceFailure,
            _ => ErrorTag::PredictionFailed,
        }
    }

    /// Short label used in exports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InsufficientHistory => "insufficient_history",
            ErrorTag::ConvergenceFailure => "convergence_failure",
            ErrorTag::ModelUnavailable => "model_unavailable",
            ErrorTag::PredictionFailed => "prediction_failed",
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
