use chrono::NaiveDate;
use index_forecast::config::{GapPolicy, PreprocessConfig, RegressorSpec};
use index_forecast::data::{PriceField, RawPriceRow, RawPriceTable};
use index_forecast::error::ForecastError;
use index_forecast::preprocess::SeriesPreprocessor;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::io::Write;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn row(day: NaiveDate, close: f64) -> RawPriceRow {
    RawPriceRow::new(day, close - 1.0, close + 2.0, close - 2.0, close)
}

fn no_regressors() -> PreprocessConfig {
    PreprocessConfig {
        regressors: Vec::new(),
        ..PreprocessConfig::default()
    }
}

#[test]
fn test_csv_loading() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Date,OPEN,High,Low,Close,Volume,vix").unwrap();
    writeln!(file, "2024-01-02,100.5,101,99,100.8,1000,14.2").unwrap();
    writeln!(file, "2024-01-03 00:00:00+05:30,101,102,100,101.5,,NaN").unwrap();

    let table = RawPriceTable::from_csv(file.path()).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.extra_columns(), &["vix".to_string()]);

    let first = &table.rows()[0];
    assert_eq!(first.date, date(2024, 1, 2));
    assert_eq!(first.open, Some(100.5));
    assert_eq!(first.volume, Some(1000.0));
    assert_eq!(first.extra.get("vix"), Some(&Some(14.2)));

    let second = &table.rows()[1];
    assert_eq!(second.date, date(2024, 1, 3));
    assert_eq!(second.volume, None);
    assert_eq!(second.extra.get("vix"), Some(&None));
}

#[test]
fn test_csv_missing_close_column() {
    let csv = "Date,Open,High,Low\n2024-01-02,1,2,0\n";
    let result = RawPriceTable::from_reader(csv.as_bytes());
    assert!(matches!(result, Err(ForecastError::MissingColumn(ref c)) if c == "Close"));
}

#[test]
fn test_csv_bad_number() {
    let csv = "Date,Open,High,Low,Close\n2024-01-02,1,2,0,abc\n";
    assert!(matches!(
        RawPriceTable::from_reader(csv.as_bytes()),
        Err(ForecastError::DataError(_))
    ));
}

#[test]
fn test_weekend_and_incomplete_rows_dropped() {
    let mut incomplete = row(date(2024, 1, 4), 103.0);
    incomplete.close = None;
    let table = RawPriceTable::new(vec![
        row(date(2024, 1, 2), 101.0),
        row(date(2024, 1, 3), 102.0),
        incomplete,
        row(date(2024, 1, 5), 104.0),
        row(date(2024, 1, 6), 105.0), // Saturday
        row(date(2024, 1, 8), 106.0),
    ]);

    let prepared = SeriesPreprocessor::new(no_regressors()).preprocess(&table).unwrap();
    let report = prepared.report();
    assert_eq!(report.non_trading_rows_dropped, 1);
    assert_eq!(report.incomplete_rows_dropped, 1);
    // The incomplete Thursday becomes an interior gap and is filled
    assert_eq!(report.filled_days, vec![date(2024, 1, 4)]);

    let series = prepared.series();
    assert_eq!(
        series.dates(),
        vec![
            date(2024, 1, 2),
            date(2024, 1, 3),
            date(2024, 1, 4),
            date(2024, 1, 5),
            date(2024, 1, 8)
        ]
    );
    assert_eq!(series.values(PriceField::Close)[2], 102.0);
    assert!(prepared.is_filled(2));
    assert!(!prepared.is_filled(3));
}

#[test]
fn test_gap_rejected() {
    let table = RawPriceTable::new(vec![row(date(2024, 1, 2), 1.0), row(date(2024, 1, 5), 2.0)]);
    let config = PreprocessConfig {
        gap_policy: GapPolicy::Reject,
        ..no_regressors()
    };
    let result = SeriesPreprocessor::new(config).preprocess(&table);
    assert!(matches!(result, Err(ForecastError::DataGap { date: d }) if d == date(2024, 1, 3)));
}

#[test]
fn test_holiday_is_not_a_gap() {
    let table = RawPriceTable::new(vec![row(date(2024, 1, 2), 1.0), row(date(2024, 1, 4), 2.0)]);
    let config = PreprocessConfig {
        gap_policy: GapPolicy::Reject,
        holidays: vec![date(2024, 1, 3)],
        ..no_regressors()
    };
    let prepared = SeriesPreprocessor::new(config).preprocess(&table).unwrap();
    assert_eq!(prepared.len(), 2);
}

#[test]
fn test_duplicate_date() {
    let table = RawPriceTable::new(vec![row(date(2024, 1, 2), 1.0), row(date(2024, 1, 2), 2.0)]);
    let result = SeriesPreprocessor::new(no_regressors()).preprocess(&table);
    assert!(matches!(result, Err(ForecastError::DuplicateDate(_))));
}

#[rstest]
#[case(date(2020, 2, 28), 0.0)]
#[case(date(2020, 3, 2), 1.0)]
#[case(date(2020, 12, 31), 1.0)]
#[case(date(2021, 1, 4), 0.0)]
fn test_covid_dummy(#[case] day: NaiveDate, #[case] expected: f64) {
    let table = RawPriceTable::new(vec![row(day, 100.0)]);
    let prepared = SeriesPreprocessor::new(PreprocessConfig::default())
        .preprocess(&table)
        .unwrap();
    let rows = prepared.feature_rows(PriceField::Close, &[PriceField::Open, PriceField::Close]);
    assert_eq!(rows[0].regressors, vec![expected]);
    assert_eq!(rows[0].companions, vec![99.0]);
}

#[test]
fn test_column_regressor_alignment() {
    let table = RawPriceTable::new(vec![
        row(date(2024, 1, 2), 1.0).with_extra("vix", Some(12.0)),
        row(date(2024, 1, 3), 2.0).with_extra("vix", None),
    ]);
    let config = PreprocessConfig {
        regressors: vec![RegressorSpec::Column {
            name: "vix".to_string(),
        }],
        ..PreprocessConfig::default()
    };
    let result = SeriesPreprocessor::new(config.clone()).preprocess(&table);
    assert!(matches!(
        result,
        Err(ForecastError::FeatureAlignment { date: d, ref regressor })
            if d == date(2024, 1, 3) && regressor == "vix"
    ));

    let missing = RawPriceTable::new(vec![row(date(2024, 1, 2), 1.0)]);
    assert!(matches!(
        SeriesPreprocessor::new(config).preprocess(&missing),
        Err(ForecastError::MissingColumn(_))
    ));
}

#[test]
fn test_regressors_beyond_series() {
    let table = RawPriceTable::new(vec![
        row(date(2024, 1, 2), 1.0).with_extra("vix", Some(12.0)),
        row(date(2024, 1, 3), 2.0).with_extra("vix", Some(13.0)),
    ]);
    let config = PreprocessConfig {
        regressors: vec![
            RegressorSpec::Column {
                name: "vix".to_string(),
            },
            RegressorSpec::DateRangeDummy {
                name: "event".to_string(),
                start: date(2024, 1, 4),
                end: date(2024, 1, 4),
            },
        ],
        ..PreprocessConfig::default()
    };
    let prepared = SeriesPreprocessor::new(config).preprocess(&table).unwrap();
    assert_eq!(prepared.regressors_for(date(2024, 1, 3)).unwrap(), vec![13.0, 0.0]);
    assert_eq!(prepared.regressors_for(date(2024, 1, 4)).unwrap(), vec![13.0, 1.0]);
}

#[test]
fn test_outliers_reported() {
    let start = date(2024, 1, 1);
    let calendar = index_forecast::TradingCalendar::weekdays();
    let days = calendar.trading_days(start, date(2024, 3, 1));
    let rows: Vec<RawPriceRow> = days
        .iter()
        .enumerate()
        .map(|(i, d)| row(*d, if i == 20 { 500.0 } else { 100.0 + (i % 3) as f64 }))
        .collect();
    let prepared = SeriesPreprocessor::new(no_regressors())
        .preprocess(&RawPriceTable::new(rows))
        .unwrap();
    assert_eq!(prepared.report().outlier_dates, vec![days[20]]);
}

#[test]
fn test_empty_table() {
    let result = SeriesPreprocessor::new(no_regressors()).preprocess(&RawPriceTable::default());
    assert!(matches!(result, Err(ForecastError::EmptySeries)));
}

#[test]
fn test_clean_input_keeps_every_row() {
    let calendar = index_forecast::TradingCalendar::weekdays();
    let days = calendar.trading_days(date(2024, 2, 1), date(2024, 4, 30));
    let rows: Vec<RawPriceRow> = days
        .iter()
        .enumerate()
        .map(|(i, d)| row(*d, 200.0 + i as f64))
        .collect();
    let prepared = SeriesPreprocessor::new(PreprocessConfig::default())
        .preprocess(&RawPriceTable::new(rows))
        .unwrap();
    assert_eq!(prepared.len(), days.len());
    assert_eq!(prepared.report().output_rows, prepared.report().input_rows);
    assert!(prepared.report().filled_days.is_empty());
}
