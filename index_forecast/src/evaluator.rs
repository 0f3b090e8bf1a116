//! Walk-forward evaluation
//!
//! For every cutoff date in the evaluation span each (field, model) slot
//! forecasts the cutoff date from data strictly before it, after refreshing
//! its fitted state on the cadence its model asks for. Slots are independent,
//! so they can be advanced on the rayon pool.

use crate::config::ForecastConfig;
use crate::data::{FeatureRow, PriceField, RawPriceTable};
use crate::error::{ErrorTag, ForecastError, Result};
use crate::models::{
    ArimaForecaster, ForecastContext, ForecastModel, LstmForecaster, ModelKind, ModelState,
};
use crate::preprocess::{PreparedData, SeriesPreprocessor};
use crate::results::{PredictionRecord, ResultSet};
use chrono::NaiveDate;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Realized residuals kept per slot
const RESIDUAL_MEMORY: usize = 256;

/// Lifecycle of a walk-forward run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorState {
    Initializing,
    Stepping,
    Finalizing,
    Done,
    Aborted,
}

/// Shared flag to stop a run between steps
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inputs shared by all slots of one field at one cutoff
struct FieldStep<'a> {
    history: &'a [FeatureRow],
    actual: Option<f64>,
}

/// One (field, model) pair and its evolving state
struct Slot {
    field: PriceField,
    field_index: usize,
    model_index: usize,
    kind: ModelKind,
    state: Option<ModelState>,
    residuals: Vec<f64>,
}

impl Slot {
    fn advance(
        &mut self,
        model: &dyn ForecastModel,
        input: &FieldStep<'_>,
        date: NaiveDate,
        step: usize,
        next_regressors: &[f64],
    ) -> Result<PredictionRecord> {
        let ctx = ForecastContext {
            history: input.history,
            cutoff: date,
            next_regressors,
            recent_residuals: &self.residuals,
            step,
        };

        let refreshed = match &self.state {
            None => model.fit(&ctx).map(Some),
            Some(state) => model.retrain_if_due(state, &ctx),
        };
        match refreshed {
            Ok(Some(state)) => self.state = Some(state),
            Ok(None) => {}
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) if self.state.is_some() && model.tolerates_stale_state() => {
                warn!(
                    "{} {} refresh failed at {}: {}; keeping previous state",
                    self.kind, self.field, date, error
                );
            }
            Err(error) => {
                debug!("{} {} unavailable at {}: {}", self.kind, self.field, date, error);
                self.state = None;
                return Ok(PredictionRecord::failed(
                    date,
                    self.field,
                    self.kind,
                    ErrorTag::from_error(&error),
                    input.actual,
                ));
            }
        }

        let state = match &self.state {
            Some(state) => state,
            None => {
                return Ok(PredictionRecord::failed(
                    date,
                    self.field,
                    self.kind,
                    ErrorTag::ModelUnavailable,
                    input.actual,
                ))
            }
        };
        let record = match model.forecast_one_step(state, &ctx) {
            Ok(forecast) => PredictionRecord::predicted(
                date,
                self.field,
                self.kind,
                forecast,
                input.actual,
                state.label(),
            ),
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                warn!("{} {} forecast failed at {}: {}", self.kind, self.field, date, error);
                PredictionRecord::failed(date, self.field, self.kind, ErrorTag::from_error(&error), input.actual)
            }
        };

        if let Some((predicted, actual)) = record.scored_pair() {
            self.residuals.push(actual - predicted);
            if self.residuals.len() > RESIDUAL_MEMORY {
                let excess = self.residuals.len() - RESIDUAL_MEMORY;
                self.residuals.drain(..excess);
            }
        }
        Ok(record)
    }
}

/// Walk-forward evaluator over a set of forecasters
pub struct WalkForwardEvaluator {
    config: ForecastConfig,
    models: Vec<Box<dyn ForecastModel>>,
    state: EvaluatorState,
    cancel: CancellationToken,
}

impl WalkForwardEvaluator {
    /// Create an evaluator with the ARIMA and LSTM forecasters from `config`
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let arima = ArimaForecaster::new(
            config.arima.clone(),
            config.order_search_cadence,
            config.confidence_level,
        )?;
        let lstm = LstmForecaster::new(
            config.lstm.clone(),
            config.lookback_window,
            config.retrain_cadence,
            config.confidence_level,
        )?;
        Self::with_models(config, vec![Box::new(arima), Box::new(lstm)])
    }

    /// Create an evaluator over caller-supplied forecasters
    pub fn with_models(config: ForecastConfig, models: Vec<Box<dyn ForecastModel>>) -> Result<Self> {
        config.validate()?;
        if models.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "At least one forecaster is required".to_string(),
            ));
        }
        for (i, model) in models.iter().enumerate() {
            if models[..i].iter().any(|m| m.kind() == model.kind()) {
                return Err(ForecastError::InvalidParameter(format!(
                    "Forecaster {} supplied twice",
                    model.kind()
                )));
            }
        }
        Ok(Self {
            config,
            models,
            state: EvaluatorState::Initializing,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn state(&self) -> EvaluatorState {
        self.state
    }

    /// Token that stops the run before its next step
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Preprocess `table` and evaluate it
    pub fn run(&mut self, table: &RawPriceTable) -> Result<ResultSet> {
        self.transition(EvaluatorState::Initializing);
        let preprocessor = SeriesPreprocessor::new(self.config.preprocess.clone());
        match preprocessor.preprocess(table) {
            Ok(data) => self.evaluate(&data),
            Err(error) => {
                self.transition(EvaluatorState::Aborted);
                Err(error)
            }
        }
    }

    /// Walk forward over the evaluation span of `data`
    pub fn evaluate(&mut self, data: &PreparedData) -> Result<ResultSet> {
        self.transition(EvaluatorState::Initializing);
        match self.walk(data) {
            Ok(records) => {
                self.transition(EvaluatorState::Finalizing);
                let results = ResultSet::new(records).with_metrics_window(self.config.metrics_window);
                results.log_summary();
                self.transition(EvaluatorState::Done);
                Ok(results)
            }
            Err(error) => {
                self.transition(EvaluatorState::Aborted);
                Err(error)
            }
        }
    }

    /// Forecast a single date from freshly fitted models
    pub fn forecast_for(&self, data: &PreparedData, date: NaiveDate) -> Result<Vec<PredictionRecord>> {
        if !data.calendar().is_trading_day(date) {
            return Err(ForecastError::NonTradingDay(date));
        }
        let last = data.series().last_date().ok_or(ForecastError::EmptySeries)?;
        let next_day = self.next_trading_day(data, last)?;
        if date > next_day {
            return Err(ForecastError::InvalidParameter(format!(
                "{} is beyond the next trading day {}",
                date, next_day
            )));
        }
        let field_rows = self.field_rows(data);
        let mut slots = self.new_slots();
        self.step(data, &field_rows, &mut slots, date, 0)
    }

    /// Cutoff dates: series dates in the span plus the next trading day
    pub fn evaluation_dates(&self, data: &PreparedData) -> Result<Vec<NaiveDate>> {
        let series = data.series();
        let last = series.last_date().ok_or(ForecastError::EmptySeries)?;
        let next_day = self.next_trading_day(data, last)?;
        let start = self
            .config
            .evaluation_start_date
            .unwrap_or_else(|| ForecastConfig::default_start(last));
        let end = self.config.evaluation_end_date.unwrap_or(next_day);

        let mut dates: Vec<NaiveDate> = series
            .records()
            .iter()
            .map(|r| r.date)
            .filter(|d| *d >= start && *d <= end)
            .collect();
        if next_day >= start && next_day <= end {
            dates.push(next_day);
        }
        if dates.is_empty() {
            return Err(ForecastError::InvalidParameter(format!(
                "No trading days between {} and {}",
                start, end
            )));
        }
        Ok(dates)
    }

    fn walk(&mut self, data: &PreparedData) -> Result<Vec<PredictionRecord>> {
        if data.is_empty() {
            return Err(ForecastError::EmptySeries);
        }
        let dates = self.evaluation_dates(data)?;
        let field_rows = self.field_rows(data);
        let mut slots = self.new_slots();
        info!(
            "Walk-forward over {} cutoffs from {} to {} with {} slots",
            dates.len(),
            dates[0],
            dates[dates.len() - 1],
            slots.len()
        );

        self.transition(EvaluatorState::Stepping);
        let mut records = Vec::with_capacity(dates.len() * slots.len());
        for (step, &date) in dates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Walk-forward cancelled before {}", date);
                return Err(ForecastError::Cancelled { date });
            }
            let step_records = self
                .step(data, &field_rows, &mut slots, date, step)
                .map_err(|e| e.aborted_at(date))?;
            records.extend(step_records);
        }
        Ok(records)
    }

    fn step(
        &self,
        data: &PreparedData,
        field_rows: &[Vec<FeatureRow>],
        slots: &mut [Slot],
        date: NaiveDate,
        step: usize,
    ) -> Result<Vec<PredictionRecord>> {
        let series = data.series();
        let as_of = self.config.as_of_date;

        let mut available = series.count_before(date);
        if let Some(released) = as_of.and_then(|a| a.succ_opt()) {
            available = available.min(series.count_before(released));
        }
        let start = self
            .config
            .rolling_window_days
            .map_or(0, |window| available.saturating_sub(window));

        let actual_index = series
            .position(date)
            .filter(|&i| !data.is_filled(i))
            .filter(|_| as_of.map_or(true, |a| date <= a));
        let next_regressors = data.regressors_for(date)?;

        let inputs: Vec<FieldStep<'_>> = field_rows
            .iter()
            .map(|rows| FieldStep {
                history: &rows[start..available],
                actual: actual_index.map(|i| rows[i].target),
            })
            .collect();
        let sufficient = available >= self.config.min_history_days;
        debug!("Cutoff {} (step {}): {} rows of history", date, step, available - start);

        let models = &self.models;
        let advance = |slot: &mut Slot| {
            let input = &inputs[slot.field_index];
            if !sufficient {
                return Ok(PredictionRecord::failed(
                    date,
                    slot.field,
                    slot.kind,
                    ErrorTag::InsufficientHistory,
                    input.actual,
                ));
            }
            slot.advance(models[slot.model_index].as_ref(), input, date, step, &next_regressors)
        };

        if self.config.parallel {
            slots.par_iter_mut().map(&advance).collect()
        } else {
            slots.iter_mut().map(&advance).collect()
        }
    }

    fn field_rows(&self, data: &PreparedData) -> Vec<Vec<FeatureRow>> {
        self.config
            .target_fields
            .iter()
            .map(|field| data.feature_rows(*field, &self.config.target_fields))
            .collect()
    }

    fn new_slots(&self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(self.config.target_fields.len() * self.models.len());
        for (field_index, field) in self.config.target_fields.iter().enumerate() {
            for (model_index, model) in self.models.iter().enumerate() {
                slots.push(Slot {
                    field: *field,
                    field_index,
                    model_index,
                    kind: model.kind(),
                    state: None,
                    residuals: Vec::new(),
                });
            }
        }
        slots
    }

    fn next_trading_day(&self, data: &PreparedData, last: NaiveDate) -> Result<NaiveDate> {
        data.calendar().next_trading_day(last).ok_or_else(|| {
            ForecastError::InvalidParameter(format!("No trading day after {}", last))
        })
    }

    fn transition(&mut self, next: EvaluatorState) {
        if self.state != next {
            debug!("Evaluator {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
