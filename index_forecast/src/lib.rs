//! # Index Forecast
//!
//! Walk-forward one-step-ahead forecasting of daily stock index prices.
//!
//! ## Features
//!
//! - Cleaning of raw OHLC tables onto a trading-day calendar, with
//!   forward-filled gaps and date-range dummy regressors
//! - ARIMA forecaster with KPSS-based differencing and AICc order search
//! - Stacked LSTM forecaster trained on scaled lookback windows
//! - Walk-forward evaluator that never lets a model see data from its
//!   cutoff date or later, and forecasts the next unseen trading day
//! - Error metrics, rolling metrics and CSV/JSON export of the results
//!
//! ## Quick Start
//!
//! ```no_run
//! use index_forecast::{ForecastConfig, RawPriceTable, WalkForwardEvaluator};
//!
//! let table = RawPriceTable::from_csv("nifty50.csv")?;
//! let mut evaluator = WalkForwardEvaluator::new(ForecastConfig::default())?;
//! let results = evaluator.run(&table)?;
//!
//! for summary in results.summary() {
//!     println!("{} {}: {:?}", summary.model_kind, summary.field, summary.metrics);
//! }
//! results.to_csv_file("forecast_results.csv")?;
//! # Ok::<(), index_forecast::ForecastError>(())
//! ```

pub mod calendar;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod results;

// Re-export commonly used types
pub use crate::calendar::TradingCalendar;
pub use crate::config::{
    ArimaConfig, ForecastConfig, GapPolicy, LstmConfig, PreprocessConfig, RegressorSpec,
};
pub use crate::data::{FeatureRow, PriceField, PriceRecord, PriceSeries, RawPriceRow, RawPriceTable};
pub use crate::error::{ErrorTag, ForecastError, Result};
pub use crate::evaluator::{CancellationToken, EvaluatorState, WalkForwardEvaluator};
pub use crate::metrics::ErrorMetrics;
pub use crate::models::{
    ArimaForecaster, ArimaOrder, ForecastContext, ForecastModel, LstmForecaster, ModelKind,
    ModelState, OneStepForecast,
};
pub use crate::preprocess::{PreparedData, PreprocessReport, SeriesPreprocessor};
pub use crate::results::{MetricsSummary, PredictionRecord, ResultSet, WideRow};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
