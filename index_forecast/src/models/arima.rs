//! ARIMA models for one-step forecasting
//!
//! Orders are chosen automatically: the differencing order by repeated KPSS
//! tests, then `(p, q)` by a grid search minimizing AICc. Coefficients are
//! estimated by conditional least squares, seeding the innovations with a
//! long autoregression and iterating the regression until the coefficients
//! settle.

use crate::config::ArimaConfig;
use crate::error::{ForecastError, Result};
use crate::models::{
    split_history, ForecastContext, ForecastModel, ModelKind, ModelState, OneStepForecast,
};
use chrono::NaiveDate;
use forecast_math::linalg::DEFAULT_RIDGE;
use forecast_math::{
    difference, integrate_one_step, kpss_level_statistic, last_levels, least_squares,
    z_for_confidence, KPSS_CRITICAL_VALUE_5PCT,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Fewest observations any ARIMA fit is attempted on
pub const MIN_OBSERVATIONS: usize = 5;

/// Regressor columns with no variation after differencing are left out
const ACTIVE_REGRESSOR_EPS: f64 = 1e-12;

/// ARIMA order (p, d, q)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArimaOrder {
    /// AR order
    pub p: usize,
    /// Differencing order
    pub d: usize,
    /// MA order
    pub q: usize,
}

impl ArimaOrder {
    /// Create a new order
    pub const fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }

    /// Order used to retry a failed fit: at most one AR term, no MA terms
    pub fn simplified(&self) -> Self {
        Self::new(self.p.min(1), self.d, 0)
    }
}

impl std::fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ARIMA({},{},{})", self.p, self.d, self.q)
    }
}

/// Outcome of an order search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderSelection {
    pub order: ArimaOrder,
    /// Criterion value of the chosen order; `None` for the fallback
    pub aicc: Option<f64>,
    /// Whether the search failed and the configured fallback was used
    pub fallback: bool,
}

/// Fitted ARIMA state for one cutoff date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaState {
    pub order: ArimaOrder,
    pub order_fallback: bool,
    pub intercept: Option<f64>,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    /// One coefficient per regressor; zero when the regressor was left out
    pub exog: Vec<f64>,
    /// Innovation variance
    pub sigma2: f64,
    pub aicc: f64,
    pub iterations: usize,
    pub observations: usize,
    /// `[y_T, Δy_T, ...]` for integrating the forecast
    levels: Vec<f64>,
    exog_levels: Vec<Vec<f64>>,
    /// Last `p` differenced values, oldest first
    diff_tail: Vec<f64>,
    /// Last `q` residuals, oldest first
    residual_tail: Vec<f64>,
    pub cutoff: NaiveDate,
    pub fitted_step: usize,
    /// Step at which the order was last searched
    pub order_step: usize,
}

/// Result of one conditional least squares estimation
#[derive(Debug, Clone)]
struct CssFit {
    intercept: Option<f64>,
    ar: Vec<f64>,
    ma: Vec<f64>,
    exog: Vec<f64>,
    sigma2: f64,
    aicc: f64,
    parameters: usize,
    iterations: usize,
    differenced: Vec<f64>,
    residuals: Vec<f64>,
}

/// ARIMA forecaster with automatic order selection
#[derive(Debug, Clone)]
pub struct ArimaForecaster {
    config: ArimaConfig,
    order_search_cadence: usize,
    confidence_level: f64,
}

impl ArimaForecaster {
    /// Create a new ARIMA forecaster
    pub fn new(config: ArimaConfig, order_search_cadence: usize, confidence_level: f64) -> Result<Self> {
        if order_search_cadence == 0 {
            return Err(ForecastError::InvalidParameter(
                "Order search cadence must be positive".to_string(),
            ));
        }
        z_for_confidence(confidence_level)?;
        if config.max_iterations == 0 {
            return Err(ForecastError::InvalidParameter(
                "ARIMA max_iterations must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            order_search_cadence,
            confidence_level,
        })
    }

    pub fn config(&self) -> &ArimaConfig {
        &self.config
    }

    /// Choose `(p, d, q)` for `series`
    ///
    /// `exog` holds one column per regressor, each as long as `series`.
    /// When no differencing order passes the stationarity test, or no
    /// candidate can be fitted, the configured fallback order is returned
    /// with `fallback` set.
    pub fn select_order(&self, series: &[f64], exog: &[Vec<f64>]) -> Result<OrderSelection> {
        if series.len() < MIN_OBSERVATIONS {
            return Err(ForecastError::InsufficientHistory {
                required: MIN_OBSERVATIONS,
                available: series.len(),
            });
        }
        check_exog(series, exog)?;

        let d = match self.choose_differencing(series) {
            Some(d) => d,
            None => return Ok(self.fallback("no differencing order passed the KPSS test")),
        };

        // Every candidate is scored on the same conditioning sample
        let condition_from = self.config.max_p.max(self.config.max_q);
        let mut best: Option<(ArimaOrder, f64, usize)> = None;

        for p in 0..=self.config.max_p {
            for q in 0..=self.config.max_q {
                let order = ArimaOrder::new(p, d, q);
                let fit = match self.estimate(series, exog, order, condition_from) {
                    Ok(fit) if fit.aicc.is_finite() => fit,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Skipping {}: {}", order, e);
                        continue;
                    }
                };
                let replace = match best {
                    None => true,
                    Some((incumbent, aicc, parameters)) => {
                        let tol = 1e-9 * (1.0 + aicc.abs());
                        if fit.aicc < aicc - tol {
                            true
                        } else if (fit.aicc - aicc).abs() <= tol {
                            (fit.parameters, p) < (parameters, incumbent.p)
                        } else {
                            false
                        }
                    }
                };
                if replace {
                    best = Some((order, fit.aicc, fit.parameters));
                }
            }
        }

        match best {
            Some((order, aicc, _)) => {
                debug!("Selected {} with AICc {:.4}", order, aicc);
                Ok(OrderSelection {
                    order,
                    aicc: Some(aicc),
                    fallback: false,
                })
            }
            None => Ok(self.fallback("no candidate order could be fitted")),
        }
    }

    /// Estimate coefficients of a fixed order on `series`
    ///
    /// A fit that fails to converge is retried once with
    /// [`ArimaOrder::simplified`].
    pub fn fit_order(
        &self,
        series: &[f64],
        exog: &[Vec<f64>],
        selection: OrderSelection,
        cutoff: NaiveDate,
        step: usize,
        order_step: usize,
    ) -> Result<ArimaState> {
        check_exog(series, exog)?;
        let requested = selection.order;
        let (fit, order) = match self.estimate(series, exog, requested, 0) {
            Ok(fit) => (fit, requested),
            Err(error @ ForecastError::Convergence { .. }) => {
                let simple = requested.simplified();
                if simple == requested {
                    return Err(error);
                }
                warn!("{} failed ({}), retrying with {}", requested, error, simple);
                (self.estimate(series, exog, simple, 0)?, simple)
            }
            Err(error) => return Err(error),
        };

        let levels = last_levels(series, order.d).ok_or(ForecastError::InsufficientHistory {
            required: order.d + 1,
            available: series.len(),
        })?;
        let exog_levels = exog
            .iter()
            .map(|column| last_levels(column, order.d).unwrap_or_default())
            .collect();

        Ok(ArimaState {
            order,
            order_fallback: selection.fallback,
            intercept: fit.intercept,
            diff_tail: tail(&fit.differenced, order.p),
            residual_tail: tail(&fit.residuals, order.q),
            ar: fit.ar,
            ma: fit.ma,
            exog: fit.exog,
            sigma2: fit.sigma2,
            aicc: fit.aicc,
            iterations: fit.iterations,
            observations: series.len(),
            levels,
            exog_levels,
            cutoff,
            fitted_step: step,
            order_step,
        })
    }

    /// Point forecast and interval for the date after the state's data
    ///
    /// `next_exog` holds the regressor values on the forecast date.
    pub fn predict_next(&self, state: &ArimaState, next_exog: &[f64]) -> Result<OneStepForecast> {
        if next_exog.len() != state.exog.len() {
            return Err(ForecastError::InvalidParameter(format!(
                "Expected {} regressor values, got {}",
                state.exog.len(),
                next_exog.len()
            )));
        }

        let mut value = state.intercept.unwrap_or(0.0);
        for (phi, lagged) in state.ar.iter().zip(state.diff_tail.iter().rev()) {
            value += phi * lagged;
        }
        for (theta, innovation) in state.ma.iter().zip(state.residual_tail.iter().rev()) {
            value += theta * innovation;
        }
        for ((beta, x), levels) in state.exog.iter().zip(next_exog).zip(&state.exog_levels) {
            if *beta != 0.0 {
                value += beta * (x - levels.iter().sum::<f64>());
            }
        }

        let point = integrate_one_step(value, &state.levels);
        let z = z_for_confidence(self.confidence_level)?;
        OneStepForecast::new(point, z * state.sigma2.sqrt())
    }

    fn fallback(&self, reason: &str) -> OrderSelection {
        warn!(
            "Order search failed ({}), using fallback {}",
            reason, self.config.fallback_order
        );
        OrderSelection {
            order: self.config.fallback_order,
            aicc: None,
            fallback: true,
        }
    }

    /// Smallest `d <= max_d` whose differenced series looks level-stationary
    fn choose_differencing(&self, series: &[f64]) -> Option<usize> {
        for d in 0..=self.config.max_d {
            let differenced = difference(series, d);
            if differenced.len() < 3 {
                break;
            }
            if kpss_level_statistic(&differenced) < KPSS_CRITICAL_VALUE_5PCT {
                return Some(d);
            }
        }
        None
    }

    fn estimate(
        &self,
        series: &[f64],
        exog: &[Vec<f64>],
        order: ArimaOrder,
        condition_from: usize,
    ) -> Result<CssFit> {
        let ArimaOrder { p, d, q } = order;
        let dy = difference(series, d);
        let dx: Vec<Vec<f64>> = exog.iter().map(|column| difference(column, d)).collect();
        let active: Vec<usize> = (0..dx.len())
            .filter(|&j| dx[j].iter().any(|v| v.abs() > ACTIVE_REGRESSOR_EPS))
            .collect();
        let has_intercept = self.config.include_constant && d <= 1;

        let n = dy.len();
        let start = condition_from.max(p).max(q);
        let k = p + q + active.len() + usize::from(has_intercept);
        if n < start + k + 2 {
            return Err(ForecastError::InsufficientHistory {
                required: start + k + 2 + d,
                available: series.len(),
            });
        }
        let n_eff = n - start;

        let convergence = |reason: String| ForecastError::Convergence {
            order: order.to_string(),
            reason,
        };

        let mut residuals = if q > 0 {
            long_ar_residuals(&dy, p + q)
        } else {
            vec![0.0; n]
        };
        let mut previous: Option<Vec<f64>> = None;
        let mut iterations = 0;

        let beta = loop {
            iterations += 1;
            let mut rows = Vec::with_capacity(n_eff);
            for t in start..n {
                let mut row = Vec::with_capacity(k);
                if has_intercept {
                    row.push(1.0);
                }
                row.extend((1..=p).map(|i| dy[t - i]));
                row.extend((1..=q).map(|j| residuals[t - j]));
                row.extend(active.iter().map(|&c| dx[c][t]));
                rows.push(row);
            }
            let beta = least_squares(&rows, &dy[start..], DEFAULT_RIDGE)
                .map_err(|e| convergence(e.to_string()))?;

            residuals = css_residuals(&dy, &dx, &active, &beta, has_intercept, p, q, start);
            if residuals.iter().any(|e| !e.is_finite()) {
                return Err(convergence("residuals diverged".to_string()));
            }
            if q == 0 {
                break beta;
            }
            if let Some(prev) = &previous {
                let change = beta
                    .iter()
                    .zip(prev)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max);
                let scale = 1.0 + beta.iter().map(|b| b.abs()).fold(0.0, f64::max);
                if change <= self.config.tolerance * scale {
                    break beta;
                }
            }
            if iterations >= self.config.max_iterations {
                return Err(convergence(format!(
                    "no convergence after {} iterations",
                    iterations
                )));
            }
            previous = Some(beta);
        };

        let mut coefficients = beta.into_iter();
        let intercept = if has_intercept {
            coefficients.next()
        } else {
            None
        };
        let ar: Vec<f64> = coefficients.by_ref().take(p).collect();
        let ma: Vec<f64> = coefficients.by_ref().take(q).collect();
        let mut exog_coefficients = vec![0.0; exog.len()];
        for (&column, value) in active.iter().zip(coefficients) {
            exog_coefficients[column] = value;
        }

        let sse: f64 = residuals[start..].iter().map(|e| e * e).sum();
        let mean_square = dy.iter().map(|v| v * v).sum::<f64>() / n as f64;
        let sigma2 = (sse / n_eff as f64).max(1e-12 * (1.0 + mean_square));

        // Innovation variance counts as a parameter
        let parameters = k + 1;
        let denom = n_eff as f64 - parameters as f64 - 1.0;
        if denom <= 0.0 {
            return Err(ForecastError::InsufficientHistory {
                required: start + parameters + 2 + d,
                available: series.len(),
            });
        }
        let kf = parameters as f64;
        let aicc = n_eff as f64 * sigma2.ln() + 2.0 * kf + 2.0 * kf * (kf + 1.0) / denom;

        Ok(CssFit {
            intercept,
            ar,
            ma,
            exog: exog_coefficients,
            sigma2,
            aicc,
            parameters,
            iterations,
            differenced: dy,
            residuals,
        })
    }
}

impl ForecastModel for ArimaForecaster {
    fn kind(&self) -> ModelKind {
        ModelKind::Arima
    }

    fn fit(&self, ctx: &ForecastContext<'_>) -> Result<ModelState> {
        let (series, exog) = split_history(ctx.history)?;
        let selection = self.select_order(&series, &exog)?;
        self.fit_order(&series, &exog, selection, ctx.cutoff, ctx.step, ctx.step)
            .map(ModelState::Arima)
    }

    fn retrain_if_due(&self, state: &ModelState, ctx: &ForecastContext<'_>) -> Result<Option<ModelState>> {
        let previous = match state {
            ModelState::Arima(previous) => previous,
            other => {
                return Err(ForecastError::InvalidParameter(format!(
                    "ARIMA forecaster cannot refresh a {} state",
                    other.kind()
                )))
            }
        };

        if ctx.step.saturating_sub(previous.order_step) >= self.order_search_cadence {
            return self.fit(ctx).map(Some);
        }

        // Coefficients are re-estimated every step with the current order
        let (series, exog) = split_history(ctx.history)?;
        let selection = OrderSelection {
            order: previous.order,
            aicc: None,
            fallback: previous.order_fallback,
        };
        self.fit_order(&series, &exog, selection, ctx.cutoff, ctx.step, previous.order_step)
            .map(|state| Some(ModelState::Arima(state)))
    }

    fn forecast_one_step(&self, state: &ModelState, ctx: &ForecastContext<'_>) -> Result<OneStepForecast> {
        match state {
            ModelState::Arima(state) if state.cutoff == ctx.cutoff => {
                self.predict_next(state, ctx.next_regressors)
            }
            ModelState::Arima(state) => Err(ForecastError::InvalidParameter(format!(
                "ARIMA state fitted for {} cannot forecast {}",
                state.cutoff, ctx.cutoff
            ))),
            other => Err(ForecastError::InvalidParameter(format!(
                "ARIMA forecaster cannot use a {} state",
                other.kind()
            ))),
        }
    }
}

fn check_exog(series: &[f64], exog: &[Vec<f64>]) -> Result<()> {
    if let Some(column) = exog.iter().find(|c| c.len() != series.len()) {
        return Err(ForecastError::InvalidParameter(format!(
            "Regressor column has {} values, series has {}",
            column.len(),
            series.len()
        )));
    }
    Ok(())
}

fn tail(values: &[f64], count: usize) -> Vec<f64> {
    values[values.len().saturating_sub(count)..].to_vec()
}

/// Innovations estimated from a long autoregression
///
/// Observations without enough lags get a zero innovation.
fn long_ar_residuals(dy: &[f64], min_order: usize) -> Vec<f64> {
    let n = dy.len();
    let order = min_order
        .max((n as f64).ln().ceil() as usize)
        .min(n / 3);
    let mut residuals = vec![0.0; n];
    if order == 0 {
        return residuals;
    }

    let rows: Vec<Vec<f64>> = (order..n)
        .map(|t| {
            let mut row = Vec::with_capacity(order + 1);
            row.push(1.0);
            row.extend((1..=order).map(|i| dy[t - i]));
            row
        })
        .collect();
    if let Ok(beta) = least_squares(&rows, &dy[order..], DEFAULT_RIDGE) {
        for (t, row) in (order..n).zip(&rows) {
            let fitted: f64 = row.iter().zip(&beta).map(|(x, b)| x * b).sum();
            residuals[t] = dy[t] - fitted;
        }
    }
    residuals
}

/// Recursive conditional residuals of the differenced series
#[allow(clippy::too_many_arguments)]
fn css_residuals(
    dy: &[f64],
    dx: &[Vec<f64>],
    active: &[usize],
    beta: &[f64],
    has_intercept: bool,
    p: usize,
    q: usize,
    start: usize,
) -> Vec<f64> {
    let offset = usize::from(has_intercept);
    let intercept = if has_intercept { beta[0] } else { 0.0 };
    let ar = &beta[offset..offset + p];
    let ma = &beta[offset + p..offset + p + q];
    let exog = &beta[offset + p + q..];

    let mut residuals = vec![0.0; dy.len()];
    for t in start..dy.len() {
        let mut predicted = intercept;
        predicted += (1..=p).map(|i| ar[i - 1] * dy[t - i]).sum::<f64>();
        predicted += (1..=q).map(|j| ma[j - 1] * residuals[t - j]).sum::<f64>();
        predicted += active
            .iter()
            .zip(exog)
            .map(|(&c, b)| b * dx[c][t])
            .sum::<f64>();
        residuals[t] = dy[t] - predicted;
    }
    residuals
}
