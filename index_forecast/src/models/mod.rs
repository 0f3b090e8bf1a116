//! Forecasting models for one-step-ahead index forecasts

use crate::data::FeatureRow;
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub mod arima;
pub mod lstm;
pub mod network;

pub use arima::{ArimaForecaster, ArimaOrder, ArimaState, OrderSelection};
pub use lstm::{LstmForecaster, LstmState};

/// Model family of a forecaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "ARIMA")]
    Arima,
    #[serde(rename = "LSTM")]
    Lstm,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Arima => "ARIMA",
            ModelKind::Lstm => "LSTM",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point forecast with a symmetric prediction interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneStepForecast {
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl OneStepForecast {
    /// Create a new forecast from a point and an interval half width
    pub fn new(point: f64, half_width: f64) -> Result<Self> {
        if !point.is_finite() || !half_width.is_finite() {
            return Err(ForecastError::DataError(format!(
                "Non-finite forecast: point {} half width {}",
                point, half_width
            )));
        }
        let half_width = half_width.abs();
        Ok(Self {
            point,
            lower: point - half_width,
            upper: point + half_width,
        })
    }
}

/// Everything a forecaster may look at for one cutoff date
///
/// `history` only contains rows dated strictly before `cutoff`.
#[derive(Debug, Clone, Copy)]
pub struct ForecastContext<'a> {
    pub history: &'a [FeatureRow],
    pub cutoff: NaiveDate,
    /// Regressor values on the cutoff date itself
    pub next_regressors: &'a [f64],
    /// Realized errors (actual minus predicted) of this slot, oldest first
    pub recent_residuals: &'a [f64],
    /// Index of the walk-forward step
    pub step: usize,
}

impl<'a> ForecastContext<'a> {
    /// Context for a single forecast outside a walk-forward run
    pub fn new(history: &'a [FeatureRow], cutoff: NaiveDate, next_regressors: &'a [f64]) -> Self {
        Self {
            history,
            cutoff,
            next_regressors,
            recent_residuals: &[],
            step: 0,
        }
    }
}

/// Fitted state of a forecaster, owned by one walk-forward slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum ModelState {
    Arima(ArimaState),
    Lstm(LstmState),
}

impl ModelState {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelState::Arima(_) => ModelKind::Arima,
            ModelState::Lstm(_) => ModelKind::Lstm,
        }
    }

    /// Cutoff date of the data the state was fitted on
    pub fn cutoff(&self) -> NaiveDate {
        match self {
            ModelState::Arima(state) => state.cutoff,
            ModelState::Lstm(state) => state.cutoff,
        }
    }

    /// Step index at which the state was last fitted
    pub fn fitted_step(&self) -> usize {
        match self {
            ModelState::Arima(state) => state.fitted_step,
            ModelState::Lstm(state) => state.fitted_step,
        }
    }

    /// Human-readable model description, e.g. `ARIMA(1,1,0)`
    pub fn label(&self) -> String {
        match self {
            ModelState::Arima(state) => state.order.to_string(),
            ModelState::Lstm(state) => state.label(),
        }
    }

    /// Persist the state as JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Load a state written by [`ModelState::save_json`]
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// One-step forecaster usable by the walk-forward evaluator
pub trait ForecastModel: Send + Sync {
    /// Model family
    fn kind(&self) -> ModelKind;

    /// Fit a fresh state on `ctx.history`
    fn fit(&self, ctx: &ForecastContext<'_>) -> Result<ModelState>;

    /// Refresh `state` for a new cutoff
    ///
    /// Returns `Ok(None)` when the current state can be used as is.
    fn retrain_if_due(&self, state: &ModelState, ctx: &ForecastContext<'_>) -> Result<Option<ModelState>>;

    /// Predict the target value on `ctx.cutoff`
    fn forecast_one_step(&self, state: &ModelState, ctx: &ForecastContext<'_>) -> Result<OneStepForecast>;

    /// Whether a state fitted at an earlier cutoff can still forecast
    /// after a failed refresh
    fn tolerates_stale_state(&self) -> bool {
        false
    }
}

/// Target values and regressor columns of `rows`
pub(crate) fn split_history(rows: &[FeatureRow]) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
    let width = rows.first().map(|r| r.regressors.len()).unwrap_or(0);
    let mut columns = vec![Vec::with_capacity(rows.len()); width];
    let mut targets = Vec::with_capacity(rows.len());
    for row in rows {
        if row.regressors.len() != width {
            return Err(ForecastError::FeatureAlignment {
                date: row.date,
                regressor: format!("expected {} regressors", width),
            });
        }
        targets.push(row.target);
        for (column, value) in columns.iter_mut().zip(&row.regressors) {
            column.push(*value);
        }
    }
    Ok((targets, columns))
}
