//! Prediction records and their aggregation into metrics and exports

use crate::data::PriceField;
use crate::error::{ErrorTag, Result};
use crate::metrics::{evaluate_pairs, ErrorMetrics};
use crate::models::{ModelKind, OneStepForecast};
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One model's forecast of one field for one date
///
/// Exactly one of `predicted` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    date: NaiveDate,
    field: PriceField,
    model_kind: ModelKind,
    predicted: Option<f64>,
    actual: Option<f64>,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    model_label: Option<String>,
    error: Option<ErrorTag>,
}

impl PredictionRecord {
    /// Create a record for a successful forecast
    pub fn predicted(
        date: NaiveDate,
        field: PriceField,
        model_kind: ModelKind,
        forecast: OneStepForecast,
        actual: Option<f64>,
        model_label: String,
    ) -> Self {
        Self {
            date,
            field,
            model_kind,
            predicted: Some(forecast.point),
            actual,
            lower_bound: Some(forecast.lower),
            upper_bound: Some(forecast.upper),
            model_label: Some(model_label),
            error: None,
        }
    }

    /// Create a record for a forecast that could not be produced
    pub fn failed(
        date: NaiveDate,
        field: PriceField,
        model_kind: ModelKind,
        error: ErrorTag,
        actual: Option<f64>,
    ) -> Self {
        Self {
            date,
            field,
            model_kind,
            predicted: None,
            actual,
            lower_bound: None,
            upper_bound: None,
            model_label: None,
            error: Some(error),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn field(&self) -> PriceField {
        self.field
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model_kind
    }

    pub fn predicted_value(&self) -> Option<f64> {
        self.predicted
    }

    pub fn actual(&self) -> Option<f64> {
        self.actual
    }

    pub fn lower_bound(&self) -> Option<f64> {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> Option<f64> {
        self.upper_bound
    }

    pub fn model_label(&self) -> Option<&str> {
        self.model_label.as_deref()
    }

    pub fn error(&self) -> Option<ErrorTag> {
        self.error
    }

    /// `(predicted, actual)` when both are known
    pub fn scored_pair(&self) -> Option<(f64, f64)> {
        Some((self.predicted?, self.actual?))
    }

    /// Sort key: date, then field, then model
    fn key(&self) -> (NaiveDate, PriceField, ModelKind) {
        (self.date, self.field, self.model_kind)
    }
}

/// Metrics of one model on one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub model_kind: ModelKind,
    pub field: PriceField,
    /// `None` when no prediction has a known actual
    pub metrics: Option<ErrorMetrics>,
    /// Metrics over the latest full rolling window
    pub rolling: Option<ErrorMetrics>,
    pub predictions: usize,
    pub failures: usize,
}

/// One date of the wide results table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    pub date: NaiveDate,
    /// Keyed `ARIMA_Open`, `LSTM_Close`, ...
    pub predictions: BTreeMap<String, Option<f64>>,
    /// Keyed `Actual_Open`, ...
    pub actuals: BTreeMap<String, Option<f64>>,
}

/// Flat CSV row of a prediction record
#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    date: NaiveDate,
    field: &'a str,
    model_kind: &'a str,
    predicted: Option<f64>,
    actual: Option<f64>,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    model_label: Option<&'a str>,
    error: Option<&'a str>,
}

/// Rolling metrics window used until one is configured
pub const DEFAULT_METRICS_WINDOW: usize = 20;

fn default_metrics_window() -> usize {
    DEFAULT_METRICS_WINDOW
}

/// Ordered collection of prediction records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    records: Vec<PredictionRecord>,
    #[serde(default = "default_metrics_window")]
    metrics_window: usize,
}

impl Default for ResultSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ResultSet {
    /// Create a result set, ordering records by date, field and model
    pub fn new(mut records: Vec<PredictionRecord>) -> Self {
        records.sort_by_key(|r| r.key());
        Self {
            records,
            metrics_window: DEFAULT_METRICS_WINDOW,
        }
    }

    /// Set the window of [`ResultSet::default_rolling_metrics`]
    pub fn with_metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window;
        self
    }

    pub fn metrics_window(&self) -> usize {
        self.metrics_window
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Model kinds present in the records
    pub fn model_kinds(&self) -> Vec<ModelKind> {
        self.records
            .iter()
            .map(|r| r.model_kind)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Records of one model on one field, in date order
    pub fn records_for(&self, kind: ModelKind, field: PriceField) -> impl Iterator<Item = &PredictionRecord> {
        self.records
            .iter()
            .filter(move |r| r.model_kind == kind && r.field == field)
    }

    /// Cumulative metrics over every record with a prediction and an actual
    pub fn metrics(&self, kind: ModelKind, field: PriceField) -> Option<ErrorMetrics> {
        evaluate_pairs(self.records_for(kind, field).filter_map(|r| r.scored_pair()))
    }

    /// Metrics over the trailing `window` scored records, one entry per
    /// scored date once the window is full
    pub fn rolling_metrics(
        &self,
        kind: ModelKind,
        field: PriceField,
        window: usize,
    ) -> Vec<(NaiveDate, ErrorMetrics)> {
        if window == 0 {
            return Vec::new();
        }
        let scored: Vec<(NaiveDate, (f64, f64))> = self
            .records_for(kind, field)
            .filter_map(|r| r.scored_pair().map(|pair| (r.date, pair)))
            .collect();
        scored
            .windows(window)
            .filter_map(|slice| {
                let date = slice.last()?.0;
                evaluate_pairs(slice.iter().map(|(_, pair)| *pair)).map(|m| (date, m))
            })
            .collect()
    }

    /// Rolling metrics over the configured window
    pub fn default_rolling_metrics(&self, kind: ModelKind, field: PriceField) -> Vec<(NaiveDate, ErrorMetrics)> {
        self.rolling_metrics(kind, field, self.metrics_window)
    }

    /// Metrics of every model on `field`, restricted to dates where all
    /// models produced a scored prediction
    pub fn comparable_metrics(&self, field: PriceField) -> Vec<(ModelKind, ErrorMetrics)> {
        let kinds = self.model_kinds();
        let mut common: Option<BTreeSet<NaiveDate>> = None;
        for kind in &kinds {
            let dates: BTreeSet<NaiveDate> = self
                .records_for(*kind, field)
                .filter(|r| r.scored_pair().is_some())
                .map(|r| r.date)
                .collect();
            common = Some(match common {
                None => dates,
                Some(previous) => previous.intersection(&dates).copied().collect(),
            });
        }
        let common = common.unwrap_or_default();

        kinds
            .into_iter()
            .filter_map(|kind| {
                let pairs = self
                    .records_for(kind, field)
                    .filter(|r| common.contains(&r.date))
                    .filter_map(|r| r.scored_pair());
                evaluate_pairs(pairs).map(|m| (kind, m))
            })
            .collect()
    }

    /// Summary per (model, field) pair present in the records
    pub fn summary(&self) -> Vec<MetricsSummary> {
        let mut pairs: Vec<(ModelKind, PriceField)> = self
            .records
            .iter()
            .map(|r| (r.model_kind, r.field))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        pairs.sort_by_key(|(kind, field)| (*field, *kind));

        pairs
            .into_iter()
            .map(|(kind, field)| {
                let records: Vec<&PredictionRecord> = self.records_for(kind, field).collect();
                MetricsSummary {
                    model_kind: kind,
                    field,
                    metrics: self.metrics(kind, field),
                    rolling: self
                        .default_rolling_metrics(kind, field)
                        .last()
                        .map(|(_, m)| *m),
                    predictions: records.iter().filter(|r| r.predicted.is_some()).count(),
                    failures: records.iter().filter(|r| r.error.is_some()).count(),
                }
            })
            .collect()
    }

    /// Log the summary at info level
    pub fn log_summary(&self) {
        for summary in self.summary() {
            match summary.metrics {
                Some(metrics) => info!("{} {}: {}", summary.model_kind, summary.field, metrics),
                None => info!(
                    "{} {}: no scored predictions ({} failures)",
                    summary.model_kind, summary.field, summary.failures
                ),
            }
            if let Some(rolling) = summary.rolling {
                info!(
                    "{} {} over the last {} scored days: {}",
                    summary.model_kind, summary.field, self.metrics_window, rolling
                );
            }
        }
    }

    /// One row per date with a column per model and field
    pub fn wide_rows(&self) -> Vec<WideRow> {
        let mut rows: BTreeMap<NaiveDate, WideRow> = BTreeMap::new();
        for record in &self.records {
            let row = rows.entry(record.date).or_insert_with(|| WideRow {
                date: record.date,
                predictions: BTreeMap::new(),
                actuals: BTreeMap::new(),
            });
            row.predictions.insert(
                format!("{}_{}", record.model_kind, record.field),
                record.predicted,
            );
            let actual = row
                .actuals
                .entry(format!("Actual_{}", record.field))
                .or_insert(None);
            if actual.is_none() {
                *actual = record.actual;
            }
        }
        rows.into_values().collect()
    }

    /// Records of the first date that has predictions but no actuals
    pub fn next_day(&self) -> Vec<&PredictionRecord> {
        let dates: BTreeSet<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        let next = dates.into_iter().find(|date| {
            let on_date = self.records.iter().filter(|r| r.date == *date);
            let mut any_prediction = false;
            for record in on_date {
                if record.actual.is_some() {
                    return false;
                }
                any_prediction |= record.predicted.is_some();
            }
            any_prediction
        });
        match next {
            Some(date) => self.records.iter().filter(|r| r.date == date).collect(),
            None => Vec::new(),
        }
    }

    /// Write the long-format records as CSV
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for record in &self.records {
            csv_writer.serialize(CsvRecord {
                date: record.date,
                field: record.field.as_str(),
                model_kind: record.model_kind.as_str(),
                predicted: record.predicted,
                actual: record.actual,
                lower_bound: record.lower_bound,
                upper_bound: record.upper_bound,
                model_label: record.model_label.as_deref(),
                error: record.error.as_ref().map(|e| e.as_str()),
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write the long-format records to a CSV file
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_csv(File::create(path)?)
    }

    /// Write the wide table (one row per date) as CSV
    pub fn write_wide_csv<W: Write>(&self, writer: W) -> Result<()> {
        let rows = self.wide_rows();
        let prediction_columns: BTreeSet<&String> =
            rows.iter().flat_map(|r| r.predictions.keys()).collect();
        let actual_columns: BTreeSet<&String> = rows.iter().flat_map(|r| r.actuals.keys()).collect();

        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec!["Date".to_string()];
        header.extend(prediction_columns.iter().map(|c| c.to_string()));
        header.extend(actual_columns.iter().map(|c| c.to_string()));
        csv_writer.write_record(&header)?;

        let cell = |value: Option<&Option<f64>>| match value {
            Some(Some(v)) => v.to_string(),
            _ => String::new(),
        };
        for row in &rows {
            let mut line = vec![row.date.to_string()];
            line.extend(prediction_columns.iter().map(|c| cell(row.predictions.get(*c))));
            line.extend(actual_columns.iter().map(|c| cell(row.actuals.get(*c))));
            csv_writer.write_record(&line)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Serialize records and summary to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Export<'a> {
            records: &'a [PredictionRecord],
            metrics_window: usize,
            summary: Vec<MetricsSummary>,
        }
        Ok(serde_json::to_string_pretty(&Export {
            records: &self.records,
            metrics_window: self.metrics_window,
            summary: self.summary(),
        })?)
    }

    /// Write [`ResultSet::to_json`] to a file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
