//! Cleaning raw price tables into validated trading-day series

use crate::calendar::TradingCalendar;
use crate::config::{GapPolicy, PreprocessConfig, RegressorSpec};
use crate::data::{FeatureRow, PriceField, PriceRecord, PriceSeries, RawPriceRow, RawPriceTable};
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use forecast_math::z_scores;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// What preprocessing removed, filled, or flagged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub input_rows: usize,
    /// Rows dated on a weekend or holiday
    pub non_trading_rows_dropped: usize,
    /// Rows with a missing or non-finite price
    pub incomplete_rows_dropped: usize,
    /// Trading days inserted by forward fill
    pub filled_days: Vec<NaiveDate>,
    /// Dates whose close lies beyond the outlier z-score threshold
    pub outlier_dates: Vec<NaiveDate>,
    pub output_rows: usize,
}

/// Validated series with aligned regressors, ready for modeling
#[derive(Debug, Clone)]
pub struct PreparedData {
    series: PriceSeries,
    filled: Vec<bool>,
    regressor_specs: Vec<RegressorSpec>,
    regressors: Vec<Vec<f64>>,
    calendar: TradingCalendar,
    report: PreprocessReport,
}

impl PreparedData {
    pub fn series(&self) -> &PriceSeries {
        &self.series
    }

    pub fn report(&self) -> &PreprocessReport {
        &self.report
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn regressor_names(&self) -> Vec<&str> {
        self.regressor_specs.iter().map(|s| s.name()).collect()
    }

    /// Whether row `index` was forward-filled
    pub fn is_filled(&self, index: usize) -> bool {
        self.filled.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Regressor values on `date`
    ///
    /// Dates inside the series use the aligned values. For later dates the
    /// dummies are evaluated directly and column regressors carry their last
    /// known value forward.
    pub fn regressors_for(&self, date: NaiveDate) -> Result<Vec<f64>> {
        if let Some(index) = self.series.position(date) {
            return Ok(self.regressors[index].clone());
        }
        let before = self.series.count_before(date);
        self.regressor_specs
            .iter()
            .enumerate()
            .map(|(j, spec)| match spec.dummy_value(date) {
                Some(value) => Ok(value),
                None => before
                    .checked_sub(1)
                    .map(|last| self.regressors[last][j])
                    .ok_or_else(|| ForecastError::FeatureAlignment {
                        date,
                        regressor: spec.name().to_string(),
                    }),
            })
            .collect()
    }

    /// Model input rows for one target field
    ///
    /// Companions are the other price fields in `fields`, in order.
    pub fn feature_rows(&self, target: PriceField, fields: &[PriceField]) -> Vec<FeatureRow> {
        let companions: Vec<PriceField> = fields.iter().copied().filter(|f| *f != target).collect();
        self.series
            .records()
            .iter()
            .enumerate()
            .map(|(i, record)| FeatureRow {
                date: record.date,
                target: record.value(target),
                companions: companions.iter().map(|f| record.value(*f)).collect(),
                regressors: self.regressors[i].clone(),
                filled: self.filled[i],
            })
            .collect()
    }
}

/// Turns a raw price table into a [`PreparedData`]
#[derive(Debug, Clone)]
pub struct SeriesPreprocessor {
    config: PreprocessConfig,
    calendar: TradingCalendar,
}

impl SeriesPreprocessor {
    /// Create a new preprocessor
    pub fn new(config: PreprocessConfig) -> Self {
        let calendar = TradingCalendar::with_holidays(config.holidays.iter().copied());
        Self { config, calendar }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Feature rows of one target field, with Open and Close as model features
    pub fn prepare_field(&self, table: &RawPriceTable, target: PriceField) -> Result<Vec<FeatureRow>> {
        let prepared = self.preprocess(table)?;
        Ok(prepared.feature_rows(target, &[PriceField::Open, PriceField::Close]))
    }

    /// Clean, align, and validate a raw table
    pub fn preprocess(&self, table: &RawPriceTable) -> Result<PreparedData> {
        if table.is_empty() {
            return Err(ForecastError::EmptySeries);
        }
        for spec in &self.config.regressors {
            if let RegressorSpec::Column { name } = spec {
                if !table.has_column(name) {
                    return Err(ForecastError::MissingColumn(name.clone()));
                }
            }
        }

        let mut report = PreprocessReport {
            input_rows: table.len(),
            ..PreprocessReport::default()
        };

        let mut rows: Vec<&RawPriceRow> = table.rows().iter().collect();
        rows.sort_by_key(|r| r.date);
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].date == pair[1].date) {
            return Err(ForecastError::DuplicateDate(pair[1].date));
        }

        let mut kept: Vec<(PriceRecord, &RawPriceRow)> = Vec::with_capacity(rows.len());
        for row in rows {
            if !self.calendar.is_trading_day(row.date) {
                report.non_trading_rows_dropped += 1;
                continue;
            }
            match complete_record(row) {
                Some(record) => kept.push((record, row)),
                None => {
                    debug!("Dropping incomplete row on {}", row.date);
                    report.incomplete_rows_dropped += 1;
                }
            }
        }
        if kept.is_empty() {
            return Err(ForecastError::EmptySeries);
        }

        let mut records: Vec<PriceRecord> = Vec::with_capacity(kept.len());
        let mut filled: Vec<bool> = Vec::with_capacity(kept.len());
        let mut regressors: Vec<Vec<f64>> = Vec::with_capacity(kept.len());

        for (record, row) in &kept {
            if let Some(previous) = records.last().copied() {
                let missing = self
                    .calendar
                    .trading_days(previous.date, record.date)
                    .into_iter()
                    .filter(|d| *d > previous.date && *d < record.date);
                for day in missing {
                    match self.config.gap_policy {
                        GapPolicy::Reject => return Err(ForecastError::DataGap { date: day }),
                        GapPolicy::ForwardFill => {
                            records.push(PriceRecord { date: day, ..previous });
                            filled.push(true);
                            let carried = regressors.last().cloned().unwrap_or_default();
                            regressors.push(self.regressors_on_fill(day, &carried));
                            report.filled_days.push(day);
                        }
                    }
                }
            }
            records.push(*record);
            filled.push(false);
            regressors.push(self.regressors_on(row)?);
        }

        let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
        let threshold = self.config.outlier_z_threshold;
        report.outlier_dates = z_scores(&closes)
            .iter()
            .zip(&records)
            .filter(|(z, _)| z.abs() > threshold)
            .map(|(_, r)| r.date)
            .collect();
        for date in &report.outlier_dates {
            debug!("Close on {} lies beyond |z| > {}", date, threshold);
        }

        let series = PriceSeries::from_records(records)?;
        report.output_rows = series.len();

        if !report.filled_days.is_empty() {
            warn!("Forward-filled {} missing trading days", report.filled_days.len());
        }
        info!(
            "Preprocessed {} rows into {} trading days ({} non-trading, {} incomplete, {} outliers)",
            report.input_rows,
            report.output_rows,
            report.non_trading_rows_dropped,
            report.incomplete_rows_dropped,
            report.outlier_dates.len()
        );

        Ok(PreparedData {
            series,
            filled,
            regressor_specs: self.config.regressors.clone(),
            regressors,
            calendar: self.calendar.clone(),
            report,
        })
    }

    fn regressors_on(&self, row: &RawPriceRow) -> Result<Vec<f64>> {
        self.config
            .regressors
            .iter()
            .map(|spec| match spec.dummy_value(row.date) {
                Some(value) => Ok(value),
                None => row
                    .extra
                    .get(spec.name())
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ForecastError::FeatureAlignment {
                        date: row.date,
                        regressor: spec.name().to_string(),
                    }),
            })
            .collect()
    }

    fn regressors_on_fill(&self, date: NaiveDate, carried: &[f64]) -> Vec<f64> {
        self.config
            .regressors
            .iter()
            .enumerate()
            .map(|(j, spec)| {
                spec.dummy_value(date)
                    .unwrap_or_else(|| carried.get(j).copied().unwrap_or(0.0))
            })
            .collect()
    }
}

fn complete_record(row: &RawPriceRow) -> Option<PriceRecord> {
    Some(PriceRecord {
        date: row.date,
        open: row.field(PriceField::Open)?,
        high: row.field(PriceField::High)?,
        low: row.field(PriceField::Low)?,
        close: row.field(PriceField::Close)?,
    })
}
