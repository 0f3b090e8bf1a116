//! LSTM forecaster over lookback windows of scaled features

use crate::config::LstmConfig;
use crate::data::FeatureRow;
use crate::error::{ForecastError, Result};
use crate::models::network::{LstmNetwork, TrainingParams};
use crate::models::{ForecastContext, ForecastModel, ModelKind, ModelState, OneStepForecast};
use chrono::NaiveDate;
use forecast_math::{z_for_confidence, MinMaxScaler};
use log::{debug, info};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Column of the target within a feature row
const TARGET_COLUMN: usize = 0;

/// Trained network plus the scaling it was trained under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmState {
    pub network: LstmNetwork,
    /// Fitted at initial training and kept across retrains
    pub scaler: MinMaxScaler,
    pub lookback: usize,
    /// In-sample RMSE in price units, used until realized residuals exist
    pub training_rmse: f64,
    pub training_rows: usize,
    pub cutoff: NaiveDate,
    pub fitted_step: usize,
    pub retrain_count: usize,
}

impl LstmState {
    pub fn label(&self) -> String {
        let sizes: Vec<String> = self
            .network
            .hidden_sizes()
            .iter()
            .map(|s| s.to_string())
            .collect();
        format!("LSTM[{}]", sizes.join(","))
    }
}

/// LSTM one-step forecaster
#[derive(Debug, Clone)]
pub struct LstmForecaster {
    config: LstmConfig,
    lookback: usize,
    retrain_cadence: usize,
    confidence_level: f64,
}

impl LstmForecaster {
    /// Create a new LSTM forecaster
    pub fn new(config: LstmConfig, lookback: usize, retrain_cadence: usize, confidence_level: f64) -> Result<Self> {
        if lookback == 0 || retrain_cadence == 0 {
            return Err(ForecastError::InvalidParameter(
                "Lookback and retrain cadence must be positive".to_string(),
            ));
        }
        if config.hidden_sizes.is_empty() || config.hidden_sizes.contains(&0) {
            return Err(ForecastError::InvalidParameter(
                "LSTM hidden sizes must be non-empty and positive".to_string(),
            ));
        }
        z_for_confidence(confidence_level)?;
        Ok(Self {
            config,
            lookback,
            retrain_cadence,
            confidence_level,
        })
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Raw features of the last `lookback` rows dated before `cutoff`
    pub fn build_window(&self, rows: &[FeatureRow], cutoff: NaiveDate) -> Result<Array2<f64>> {
        let end = rows.partition_point(|r| r.date < cutoff);
        if end < self.lookback {
            return Err(ForecastError::InsufficientHistory {
                required: self.lookback,
                available: end,
            });
        }
        feature_matrix(&rows[end - self.lookback..end])
    }

    /// Scale a window with a fitted scaler
    pub fn normalize(&self, window: &Array2<f64>, scaler: &MinMaxScaler) -> Result<Array2<f64>> {
        if window.ncols() != scaler.width() {
            return Err(ForecastError::InvalidParameter(format!(
                "Window has {} features, scaler was fitted on {}",
                window.ncols(),
                scaler.width()
            )));
        }
        let mut scaled = window.clone();
        for mut row in scaled.rows_mut() {
            for (column, value) in row.iter_mut().enumerate() {
                *value = scaler.transform_value(column, *value)?;
            }
        }
        Ok(scaled)
    }

    /// Fit a scaler and a fresh network on `rows`
    pub fn train(&self, rows: &[FeatureRow], cutoff: NaiveDate, step: usize) -> Result<LstmState> {
        let features = rows.iter().map(|r| r.features()).collect::<Vec<_>>();
        let scaler = MinMaxScaler::fit(&features).map_err(|e| match e {
            forecast_math::MathError::InsufficientData(_) => ForecastError::InsufficientHistory {
                required: self.lookback + 1,
                available: rows.len(),
            },
            other => other.into(),
        })?;
        self.train_with_scaler(rows, scaler, cutoff, step, 0)
    }

    /// Retrain on `rows` keeping the scaler of `previous`
    pub fn retrain(&self, rows: &[FeatureRow], previous: &LstmState, cutoff: NaiveDate, step: usize) -> Result<LstmState> {
        self.train_with_scaler(rows, previous.scaler.clone(), cutoff, step, previous.retrain_count + 1)
    }

    /// Point prediction for the row after `window`
    pub fn predict_point(&self, state: &LstmState, window: &Array2<f64>) -> Result<f64> {
        let scaled = self.normalize(window, &state.scaler)?;
        let output = state.network.predict(&scaled)?;
        Ok(state.scaler.inverse_value(TARGET_COLUMN, output)?)
    }

    fn train_with_scaler(
        &self,
        rows: &[FeatureRow],
        scaler: MinMaxScaler,
        cutoff: NaiveDate,
        step: usize,
        retrain_count: usize,
    ) -> Result<LstmState> {
        if rows.len() < self.lookback + 1 {
            return Err(ForecastError::InsufficientHistory {
                required: self.lookback + 1,
                available: rows.len(),
            });
        }
        let matrix = feature_matrix(rows)?;
        let scaled = self.normalize(&matrix, &scaler)?;

        let samples: Vec<(Array2<f64>, f64)> = (0..rows.len() - self.lookback)
            .map(|start| {
                let window = scaled
                    .slice(ndarray::s![start..start + self.lookback, ..])
                    .to_owned();
                (window, scaled[[start + self.lookback, TARGET_COLUMN]])
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut network = LstmNetwork::new(
            scaler.width(),
            &self.config.hidden_sizes,
            self.config.dropout,
            &mut rng,
        )?;
        let params = TrainingParams {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            learning_rate: self.config.learning_rate,
            gradient_clip: self.config.gradient_clip,
        };
        let losses = network.train(&samples, &params, &mut rng)?;

        let range = scaler.range_of(TARGET_COLUMN)?;
        let mut squared = 0.0;
        for (window, target) in &samples {
            let error = (network.predict(window)? - target) * range;
            squared += error * error;
        }
        let training_rmse = (squared / samples.len() as f64).sqrt();

        debug!(
            "LSTM trained on {} windows before {}: final loss {:.6}, rmse {:.4}",
            samples.len(),
            cutoff,
            losses.last().copied().unwrap_or(f64::NAN),
            training_rmse
        );

        Ok(LstmState {
            network,
            scaler,
            lookback: self.lookback,
            training_rmse,
            training_rows: rows.len(),
            cutoff,
            fitted_step: step,
            retrain_count,
        })
    }

    fn interval_sigma(&self, state: &LstmState, residuals: &[f64]) -> f64 {
        let recent = &residuals[residuals.len().saturating_sub(self.config.residual_window)..];
        if recent.is_empty() {
            return state.training_rmse;
        }
        (recent.iter().map(|e| e * e).sum::<f64>() / recent.len() as f64).sqrt()
    }
}

impl ForecastModel for LstmForecaster {
    fn kind(&self) -> ModelKind {
        ModelKind::Lstm
    }

    fn fit(&self, ctx: &ForecastContext<'_>) -> Result<ModelState> {
        let state = self.train(ctx.history, ctx.cutoff, ctx.step)?;
        info!("Initial LSTM training done for cutoff {}", ctx.cutoff);
        Ok(ModelState::Lstm(state))
    }

    fn retrain_if_due(&self, state: &ModelState, ctx: &ForecastContext<'_>) -> Result<Option<ModelState>> {
        let previous = match state {
            ModelState::Lstm(previous) => previous,
            other => {
                return Err(ForecastError::InvalidParameter(format!(
                    "LSTM forecaster cannot refresh a {} state",
                    other.kind()
                )))
            }
        };
        if ctx.step.saturating_sub(previous.fitted_step) < self.retrain_cadence {
            return Ok(None);
        }
        info!("Retraining LSTM for cutoff {}", ctx.cutoff);
        self.retrain(ctx.history, previous, ctx.cutoff, ctx.step)
            .map(|state| Some(ModelState::Lstm(state)))
    }

    fn forecast_one_step(&self, state: &ModelState, ctx: &ForecastContext<'_>) -> Result<OneStepForecast> {
        let state = match state {
            ModelState::Lstm(state) => state,
            other => {
                return Err(ForecastError::InvalidParameter(format!(
                    "LSTM forecaster cannot use a {} state",
                    other.kind()
                )))
            }
        };
        let window = self.build_window(ctx.history, ctx.cutoff)?;
        let point = self.predict_point(state, &window)?;
        let z = z_for_confidence(self.confidence_level)?;
        OneStepForecast::new(point, z * self.interval_sigma(state, ctx.recent_residuals))
    }

    fn tolerates_stale_state(&self) -> bool {
        true
    }
}

fn feature_matrix(rows: &[FeatureRow]) -> Result<Array2<f64>> {
    let width = rows.first().map(|r| r.width()).unwrap_or(0);
    let mut values = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.width() != width {
            return Err(ForecastError::FeatureAlignment {
                date: row.date,
                regressor: format!("expected {} features", width),
            });
        }
        values.extend(row.features());
    }
    Array2::from_shape_vec((rows.len(), width), values)
        .map_err(|e| ForecastError::DataError(format!("Feature matrix: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rows(n: usize) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| FeatureRow {
                date: start + chrono::Duration::days(i as i64),
                target: 100.0 + i as f64,
                companions: vec![99.0 + i as f64],
                regressors: vec![0.0],
                filled: false,
            })
            .collect()
    }

    fn small_config() -> LstmConfig {
        LstmConfig {
            hidden_sizes: vec![6],
            epochs: 2,
            batch_size: 8,
            ..LstmConfig::default()
        }
    }

    #[test]
    fn test_build_window_uses_rows_before_cutoff() {
        let forecaster = LstmForecaster::new(small_config(), 5, 5, 0.95).unwrap();
        let data = rows(20);
        let window = forecaster.build_window(&data, data[10].date).unwrap();
        assert_eq!(window.dim(), (5, 3));
        assert_eq!(window[[4, 0]], data[9].target);
        assert_eq!(window[[0, 0]], data[5].target);
    }

    #[test]
    fn test_build_window_at_lookback_boundary() {
        let forecaster = LstmForecaster::new(small_config(), 5, 5, 0.95).unwrap();
        let data = rows(20);
        let window = forecaster.build_window(&data, data[5].date).unwrap();
        assert_eq!(window.nrows(), 5);
        assert_eq!(window[[0, 0]], data[0].target);
        assert_eq!(window[[4, 0]], data[4].target);

        let short = forecaster.build_window(&data, data[4].date);
        assert!(matches!(
            short,
            Err(ForecastError::InsufficientHistory { required: 5, available: 4 })
        ));
    }

    #[test]
    fn test_build_window_insufficient() {
        let forecaster = LstmForecaster::new(small_config(), 5, 5, 0.95).unwrap();
        let data = rows(20);
        let result = forecaster.build_window(&data, data[3].date);
        assert!(matches!(
            result,
            Err(ForecastError::InsufficientHistory { required: 5, available: 3 })
        ));
    }

    #[test]
    fn test_training_is_deterministic() {
        let forecaster = LstmForecaster::new(small_config(), 5, 5, 0.95).unwrap();
        let data = rows(30);
        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let a = forecaster.train(&data, cutoff, 0).unwrap();
        let b = forecaster.train(&data, cutoff, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.label(), "LSTM[6]");
    }

    #[test]
    fn test_retrain_keeps_scaler() {
        let forecaster = LstmForecaster::new(small_config(), 5, 5, 0.95).unwrap();
        let data = rows(40);
        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let first = forecaster.train(&data[..20], cutoff, 0).unwrap();
        let second = forecaster.retrain(&data, &first, cutoff, 5).unwrap();
        assert_eq!(first.scaler, second.scaler);
        assert_eq!(second.retrain_count, 1);
        assert_eq!(second.training_rows, 40);
    }

    #[test]
    fn test_interval_uses_recent_residuals() {
        let forecaster = LstmForecaster::new(small_config(), 5, 5, 0.95).unwrap();
        let data = rows(30);
        let cutoff = data[29].date + chrono::Duration::days(1);
        let state = forecaster.train(&data, cutoff, 0).unwrap();
        let model_state = ModelState::Lstm(state);
        let residuals = [2.0, -2.0];
        let ctx = ForecastContext {
            history: &data,
            cutoff,
            next_regressors: &[0.0],
            recent_residuals: &residuals,
            step: 0,
        };
        let forecast = forecaster.forecast_one_step(&model_state, &ctx).unwrap();
        assert_relative_eq!(forecast.upper - forecast.point, 1.959964 * 2.0, epsilon = 1e-4);
    }
}
