//! Run configuration
//!
//! Every option has a default so a configuration file only needs to name
//! what it changes.

use crate::data::PriceField;
use crate::error::{ForecastError, Result};
use crate::models::arima::ArimaOrder;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How missing trading days inside the data range are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Fail preprocessing with a data gap error
    Reject,
    /// Repeat the previous record, marking the row as filled
    ForwardFill,
}

/// Auxiliary regressor definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressorSpec {
    /// 1.0 inside the closed date range, 0.0 outside
    DateRangeDummy {
        name: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Values taken from an extra column of the raw table
    Column { name: String },
}

impl RegressorSpec {
    pub fn name(&self) -> &str {
        match self {
            RegressorSpec::DateRangeDummy { name, .. } => name,
            RegressorSpec::Column { name } => name,
        }
    }

    /// Value of a date-range dummy; `None` for column regressors
    pub fn dummy_value(&self, date: NaiveDate) -> Option<f64> {
        match self {
            RegressorSpec::DateRangeDummy { start, end, .. } => {
                Some(if date >= *start && date <= *end { 1.0 } else { 0.0 })
            }
            RegressorSpec::Column { .. } => None,
        }
    }

    /// The 2020 market shock indicator used by default
    pub fn covid_dummy() -> Self {
        RegressorSpec::DateRangeDummy {
            name: "covid_dummy".to_string(),
            start: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }
}

/// Preprocessing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub gap_policy: GapPolicy,
    /// Exchange holidays removed from the trading calendar
    pub holidays: Vec<NaiveDate>,
    pub regressors: Vec<RegressorSpec>,
    /// Absolute z-score above which a close is reported as an outlier
    pub outlier_z_threshold: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            gap_policy: GapPolicy::ForwardFill,
            holidays: Vec::new(),
            regressors: vec![RegressorSpec::covid_dummy()],
            outlier_z_threshold: 3.0,
        }
    }
}

/// Order search and estimation options for the statistical model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArimaConfig {
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
    /// Iteration budget of the conditional least squares fit
    pub max_iterations: usize,
    /// Convergence tolerance on the coefficient change
    pub tolerance: f64,
    /// Fit an intercept (drift) when the differencing order is at most one
    pub include_constant: bool,
    /// Order used when no candidate order can be selected
    pub fallback_order: ArimaOrder,
}

impl Default for ArimaConfig {
    fn default() -> Self {
        Self {
            max_p: 3,
            max_d: 2,
            max_q: 3,
            max_iterations: 50,
            tolerance: 1e-6,
            include_constant: true,
            fallback_order: ArimaOrder::new(1, 1, 1),
        }
    }
}

/// Network shape and training options for the recurrent model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmConfig {
    /// Hidden units of each stacked recurrent layer
    pub hidden_sizes: Vec<usize>,
    pub dropout: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seed for weight initialization and dropout masks
    pub seed: u64,
    /// Number of recent residuals used for the interval width
    pub residual_window: usize,
    /// Element-wise gradient clip
    pub gradient_clip: f64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![64, 32],
            dropout: 0.2,
            epochs: 5,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
            residual_window: 20,
            gradient_clip: 1.0,
        }
    }
}

/// Walk-forward run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Number of trailing rows in one recurrent model input window
    pub lookback_window: usize,
    /// Steps between recurrent model retrains
    pub retrain_cadence: usize,
    /// Steps between statistical order searches
    pub order_search_cadence: usize,
    pub confidence_level: f64,
    /// First cutoff date; defaults to one year before the last observation
    pub evaluation_start_date: Option<NaiveDate>,
    /// Last cutoff date; defaults to the next trading day after the data
    pub evaluation_end_date: Option<NaiveDate>,
    /// Rows required before a cutoff for any model to run
    pub min_history_days: usize,
    /// Data released after this date is treated as unknown
    pub as_of_date: Option<NaiveDate>,
    pub target_fields: Vec<PriceField>,
    /// Trailing training window in trading days; `None` means expanding
    pub rolling_window_days: Option<usize>,
    /// Window of the rolling error metrics
    pub metrics_window: usize,
    /// Advance model slots on the rayon thread pool
    pub parallel: bool,
    pub preprocess: PreprocessConfig,
    pub arima: ArimaConfig,
    pub lstm: LstmConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lookback_window: 60,
            retrain_cadence: 5,
            order_search_cadence: 20,
            confidence_level: 0.95,
            evaluation_start_date: None,
            evaluation_end_date: None,
            min_history_days: 30,
            as_of_date: None,
            target_fields: vec![PriceField::Open, PriceField::Close],
            rolling_window_days: Some(756),
            metrics_window: 20,
            parallel: false,
            preprocess: PreprocessConfig::default(),
            arima: ArimaConfig::default(),
            lstm: LstmConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Parse a JSON configuration and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ForecastConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file and validate it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Default first cutoff: the day after one year before the last observation
    pub fn default_start(last_observation: NaiveDate) -> NaiveDate {
        last_observation
            .checked_sub_months(Months::new(12))
            .and_then(|d| d.succ_opt())
            .unwrap_or(last_observation)
    }

    /// Check option ranges and cross-option consistency
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ForecastError::InvalidParameter(msg.to_string()));

        if self.lookback_window == 0 {
            return invalid("lookback_window must be positive");
        }
        if self.retrain_cadence == 0 || self.order_search_cadence == 0 {
            return invalid("retrain and order search cadences must be positive");
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return invalid("confidence_level must be between 0 and 1");
        }
        if self.min_history_days == 0 {
            return invalid("min_history_days must be positive");
        }
        if self.metrics_window == 0 {
            return invalid("metrics_window must be positive");
        }
        if let (Some(start), Some(end)) = (self.evaluation_start_date, self.evaluation_end_date) {
            if start > end {
                return Err(ForecastError::InvalidParameter(format!(
                    "evaluation_start_date {} is after evaluation_end_date {}",
                    start, end
                )));
            }
        }
        if self.target_fields.is_empty() {
            return invalid("target_fields must not be empty");
        }
        for (i, field) in self.target_fields.iter().enumerate() {
            if self.target_fields[..i].contains(field) {
                return Err(ForecastError::InvalidParameter(format!(
                    "target field {} listed twice",
                    field
                )));
            }
        }
        if let Some(window) = self.rolling_window_days {
            if window <= self.lookback_window {
                return Err(ForecastError::InvalidParameter(format!(
                    "rolling_window_days ({}) must exceed lookback_window ({})",
                    window, self.lookback_window
                )));
            }
        }

        let names: Vec<&str> = self.preprocess.regressors.iter().map(|r| r.name()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(ForecastError::InvalidParameter(format!(
                    "regressor '{}' defined twice",
                    name
                )));
            }
        }
        for regressor in &self.preprocess.regressors {
            if let RegressorSpec::DateRangeDummy { name, start, end } = regressor {
                if start > end {
                    return Err(ForecastError::InvalidParameter(format!(
                        "regressor '{}' has start after end",
                        name
                    )));
                }
            }
        }
        if !(self.preprocess.outlier_z_threshold > 0.0) {
            return invalid("outlier_z_threshold must be positive");
        }

        let arima = &self.arima;
        if arima.max_iterations == 0 || !(arima.tolerance > 0.0) {
            return invalid("arima max_iterations and tolerance must be positive");
        }
        if arima.fallback_order.d > arima.max_d {
            return invalid("arima fallback_order exceeds max_d");
        }

        let lstm = &self.lstm;
        if lstm.hidden_sizes.is_empty() || lstm.hidden_sizes.contains(&0) {
            return invalid("lstm hidden_sizes must be non-empty and positive");
        }
        if !(lstm.dropout >= 0.0 && lstm.dropout < 1.0) {
            return invalid("lstm dropout must be in [0, 1)");
        }
        if lstm.epochs == 0 || lstm.batch_size == 0 || lstm.residual_window == 0 {
            return invalid("lstm epochs, batch_size and residual_window must be positive");
        }
        if !(lstm.learning_rate > 0.0) || !(lstm.gradient_clip > 0.0) {
            return invalid("lstm learning_rate and gradient_clip must be positive");
        }

        Ok(())
    }
}
