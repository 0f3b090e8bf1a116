//! # Index Forecast Workspace
//!
//! Umbrella crate re-exporting the workspace members:
//!
//! - [`math`]: numerical kernels (least squares, differencing, KPSS, scaling)
//! - [`forecast`]: preprocessing, ARIMA and LSTM forecasters, walk-forward evaluation
//!
//! ## Example
//!
//! ```
//! use index_forecast_workspace::forecast::ForecastConfig;
//! use index_forecast_workspace::math::z_for_confidence;
//!
//! let config = ForecastConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let z = z_for_confidence(config.confidence_level).unwrap();
//! assert!((z - 1.96).abs() < 1e-3);
//! ```

pub use forecast_math as math;
pub use index_forecast as forecast;
