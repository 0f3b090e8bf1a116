//! Price tables, price series and feature rows

use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// A modeled price field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

impl PriceField {
    /// Canonical column name
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceField::Open => "Open",
            PriceField::High => "High",
            PriceField::Low => "Low",
            PriceField::Close => "Close",
        }
    }
}

impl std::fmt::Display for PriceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceField {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(PriceField::Open),
            "high" => Ok(PriceField::High),
            "low" => Ok(PriceField::Low),
            "close" => Ok(PriceField::Close),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown price field '{}'",
                other
            ))),
        }
    }
}

/// One row of a raw price table as delivered by data acquisition
///
/// Numeric fields are optional because providers do emit incomplete rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPriceRow {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    /// Additional named columns (auxiliary regressors)
    #[serde(default)]
    pub extra: BTreeMap<String, Option<f64>>,
}

impl RawPriceRow {
    /// Create a complete row without extra columns
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            date,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            volume: None,
            extra: BTreeMap::new(),
        }
    }

    /// Attach an extra column value
    pub fn with_extra(mut self, name: &str, value: Option<f64>) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Value of a price field, if present and finite
    pub fn field(&self, field: PriceField) -> Option<f64> {
        let value = match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        };
        value.filter(|v| v.is_finite())
    }
}

/// Raw, unvalidated price table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPriceTable {
    rows: Vec<RawPriceRow>,
    extra_columns: Vec<String>,
}

impl RawPriceTable {
    /// Create a table from rows; extra column names are collected from the rows
    pub fn new(rows: Vec<RawPriceRow>) -> Self {
        let mut extra_columns: Vec<String> = Vec::new();
        for row in &rows {
            for name in row.extra.keys() {
                if !extra_columns.contains(name) {
                    extra_columns.push(name.clone());
                }
            }
        }
        Self {
            rows,
            extra_columns,
        }
    }

    /// Load a table from a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load a table from any CSV source
    ///
    /// Expects a header row. The date column is detected by name
    /// (`date`, `time`, `timestamp`); OHLC and volume columns are matched
    /// case-insensitively and every other column is kept as an extra column.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();

        let find = |candidates: &[&str]| {
            headers.iter().position(|h| {
                let lower = h.to_lowercase();
                candidates.iter().any(|c| lower == *c)
            })
        };

        let date_idx = find(&["date", "time", "timestamp", "datetime"])
            .ok_or_else(|| ForecastError::MissingColumn("date".to_string()))?;
        let open_idx = find(&["open"]).ok_or_else(|| ForecastError::MissingColumn("Open".to_string()))?;
        let high_idx = find(&["high"]).ok_or_else(|| ForecastError::MissingColumn("High".to_string()))?;
        let low_idx = find(&["low"]).ok_or_else(|| ForecastError::MissingColumn("Low".to_string()))?;
        let close_idx = find(&["close"]).ok_or_else(|| ForecastError::MissingColumn("Close".to_string()))?;
        let volume_idx = find(&["volume"]);

        let known = [
            Some(date_idx),
            Some(open_idx),
            Some(high_idx),
            Some(low_idx),
            Some(close_idx),
            volume_idx,
        ];
        let extra: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !known.contains(&Some(*i)))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            let raw_date = record.get(date_idx).unwrap_or("");
            let date = parse_date(raw_date)?;

            let cell = |idx: usize| parse_optional_f64(record.get(idx).unwrap_or(""));
            let mut row = RawPriceRow {
                date,
                open: cell(open_idx)?,
                high: cell(high_idx)?,
                low: cell(low_idx)?,
                close: cell(close_idx)?,
                volume: match volume_idx {
                    Some(idx) => cell(idx)?,
                    None => None,
                },
                extra: BTreeMap::new(),
            };
            for (idx, name) in &extra {
                row.extra.insert(name.clone(), cell(*idx)?);
            }
            rows.push(row);
        }

        Ok(Self {
            rows,
            extra_columns: extra.into_iter().map(|(_, name)| name).collect(),
        })
    }

    /// All rows in input order
    pub fn rows(&self) -> &[RawPriceRow] {
        &self.rows
    }

    /// Names of the extra columns
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// Whether an extra column is present
    pub fn has_column(&self, name: &str) -> bool {
        self.extra_columns.iter().any(|c| c == name)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parse `YYYY-MM-DD`, ignoring any time-of-day suffix
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| ForecastError::DataError(format!("Invalid date '{}': {}", raw, e)))
}

fn parse_optional_f64(raw: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|e| ForecastError::DataError(format!("Invalid number '{}': {}", raw, e)))
}

/// A complete daily price record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceRecord {
    /// Value of one price field
    pub fn value(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }
}

/// Validated daily price series: strictly increasing dates, finite values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    records: Vec<PriceRecord>,
}

impl PriceSeries {
    /// Create a series, enforcing the ordering and completeness invariants
    pub fn from_records(records: Vec<PriceRecord>) -> Result<Self> {
        for pair in records.windows(2) {
            if pair[1].date == pair[0].date {
                return Err(ForecastError::DuplicateDate(pair[1].date));
            }
            if pair[1].date < pair[0].date {
                return Err(ForecastError::DataError(format!(
                    "Dates out of order: {} after {}",
                    pair[1].date, pair[0].date
                )));
            }
        }
        if let Some(bad) = records.iter().find(|r| {
            ![r.open, r.high, r.low, r.close]
                .iter()
                .all(|v| v.is_finite())
        }) {
            return Err(ForecastError::DataError(format!(
                "Non-finite price on {}",
                bad.date
            )));
        }
        Ok(Self { records })
    }

    /// All records in chronological order
    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    /// Values of one field in chronological order
    pub fn values(&self, field: PriceField) -> Vec<f64> {
        self.records.iter().map(|r| r.value(field)).collect()
    }

    /// Dates in chronological order
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records.iter().map(|r| r.date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// Index of the record for `date`
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.records.binary_search_by_key(&date, |r| r.date).ok()
    }

    /// Number of records dated strictly before `date`
    pub fn count_before(&self, date: NaiveDate) -> usize {
        self.records.partition_point(|r| r.date < date)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the series is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Date-indexed model input derived from a price series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    /// Value of the target field
    pub target: f64,
    /// Values of the other modeled price fields
    pub companions: Vec<f64>,
    /// Auxiliary regressor values
    pub regressors: Vec<f64>,
    /// Whether the row was forward-filled over a gap
    pub filled: bool,
}

impl FeatureRow {
    /// Full feature vector: target, companions, regressors
    pub fn features(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(1 + self.companions.len() + self.regressors.len());
        values.push(self.target);
        values.extend_from_slice(&self.companions);
        values.extend_from_slice(&self.regressors);
        values
    }

    /// Width of [`FeatureRow::features`]
    pub fn width(&self) -> usize {
        1 + self.companions.len() + self.regressors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_with_padding_and_time() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(parse_date(" 2024-01-02 ").unwrap(), expected);
        assert_eq!(parse_date("\t2024-01-02T09:15:00Z").unwrap(), expected);
        assert!(parse_date("02/01/2024").is_err());
    }

    #[test]
    fn test_parse_optional_cells() {
        assert_eq!(parse_optional_f64(" nan ").unwrap(), None);
        assert_eq!(parse_optional_f64("").unwrap(), None);
        assert_eq!(parse_optional_f64("1.5").unwrap(), Some(1.5));
    }
}
