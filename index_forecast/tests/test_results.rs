use approx::assert_relative_eq;
use chrono::NaiveDate;
use index_forecast::data::PriceField;
use index_forecast::error::ErrorTag;
use index_forecast::models::{ModelKind, OneStepForecast};
use index_forecast::results::{PredictionRecord, ResultSet};
use pretty_assertions::assert_eq;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn predicted(date: NaiveDate, kind: ModelKind, point: f64, actual: Option<f64>) -> PredictionRecord {
    let forecast = OneStepForecast::new(point, 2.0).unwrap();
    let label = match kind {
        ModelKind::Arima => "ARIMA(1,1,0)",
        ModelKind::Lstm => "LSTM[64,32]",
    };
    PredictionRecord::predicted(date, PriceField::Close, kind, forecast, actual, label.to_string())
}

/// Three scored dates and one next-day forecast per model; the LSTM has no
/// forecast on the first date.
fn sample() -> ResultSet {
    ResultSet::new(vec![
        predicted(day(5), ModelKind::Lstm, 101.0, None),
        predicted(day(5), ModelKind::Arima, 102.0, None),
        predicted(day(4), ModelKind::Lstm, 96.0, Some(100.0)),
        predicted(day(4), ModelKind::Arima, 100.0, Some(100.0)),
        predicted(day(3), ModelKind::Lstm, 104.0, Some(100.0)),
        predicted(day(3), ModelKind::Arima, 99.0, Some(100.0)),
        PredictionRecord::failed(
            day(2),
            PriceField::Close,
            ModelKind::Lstm,
            ErrorTag::InsufficientHistory,
            Some(100.0),
        ),
        predicted(day(2), ModelKind::Arima, 101.0, Some(100.0)),
    ])
}

#[test]
fn test_records_are_ordered() {
    let results = sample();
    let keys: Vec<(NaiveDate, ModelKind)> = results
        .records()
        .iter()
        .map(|r| (r.date(), r.model_kind()))
        .collect();
    assert_eq!(keys[0], (day(2), ModelKind::Arima));
    assert_eq!(keys[1], (day(2), ModelKind::Lstm));
    assert_eq!(keys[7], (day(5), ModelKind::Lstm));
    assert_eq!(results.model_kinds(), vec![ModelKind::Arima, ModelKind::Lstm]);

    let failed = &results.records()[1];
    assert_eq!(failed.predicted_value(), None);
    assert_eq!(failed.error(), Some(ErrorTag::InsufficientHistory));
    assert_eq!(failed.scored_pair(), None);
}

#[test]
fn test_cumulative_metrics() {
    let results = sample();

    let arima = results.metrics(ModelKind::Arima, PriceField::Close).unwrap();
    assert_eq!(arima.count, 3);
    assert_relative_eq!(arima.rmse, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    assert_relative_eq!(arima.mae, 2.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(arima.mape, 2.0 / 3.0, epsilon = 1e-12);

    let lstm = results.metrics(ModelKind::Lstm, PriceField::Close).unwrap();
    assert_eq!(lstm.count, 2);
    assert_relative_eq!(lstm.rmse, 4.0, epsilon = 1e-12);
    assert_relative_eq!(lstm.mape, 4.0, epsilon = 1e-12);

    assert!(results.metrics(ModelKind::Arima, PriceField::Open).is_none());
}

#[test]
fn test_comparable_metrics_use_common_dates() {
    let comparable = sample().comparable_metrics(PriceField::Close);
    assert_eq!(comparable.len(), 2);

    let (kind, arima) = comparable[0];
    assert_eq!(kind, ModelKind::Arima);
    assert_eq!(arima.count, 2);
    assert_relative_eq!(arima.rmse, 0.5f64.sqrt(), epsilon = 1e-12);

    let (kind, lstm) = comparable[1];
    assert_eq!(kind, ModelKind::Lstm);
    assert_eq!(lstm.count, 2);
}

#[test]
fn test_rolling_metrics() {
    let rolling = sample().rolling_metrics(ModelKind::Arima, PriceField::Close, 2);
    assert_eq!(rolling.len(), 2);
    assert_eq!(rolling[0].0, day(3));
    assert_relative_eq!(rolling[0].1.rmse, 1.0, epsilon = 1e-12);
    assert_eq!(rolling[1].0, day(4));
    assert_relative_eq!(rolling[1].1.rmse, 0.5f64.sqrt(), epsilon = 1e-12);

    assert!(sample()
        .rolling_metrics(ModelKind::Lstm, PriceField::Close, 5)
        .is_empty());
}

#[test]
fn test_summary() {
    let summary = sample().summary();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].model_kind, ModelKind::Arima);
    assert_eq!(summary[0].predictions, 4);
    assert_eq!(summary[0].failures, 0);
    assert_eq!(summary[1].model_kind, ModelKind::Lstm);
    assert_eq!(summary[1].predictions, 3);
    assert_eq!(summary[1].failures, 1);
}

#[test]
fn test_wide_rows_and_next_day() {
    let results = sample();
    let wide = results.wide_rows();
    assert_eq!(wide.len(), 4);
    assert_eq!(wide[0].date, day(2));
    assert_eq!(wide[0].predictions["ARIMA_Close"], Some(101.0));
    assert_eq!(wide[0].predictions["LSTM_Close"], None);
    assert_eq!(wide[0].actuals["Actual_Close"], Some(100.0));
    assert_eq!(wide[3].actuals["Actual_Close"], None);

    let next = results.next_day();
    assert_eq!(next.len(), 2);
    assert!(next.iter().all(|r| r.date() == day(5) && r.actual().is_none()));
}

#[test]
fn test_csv_export() {
    let mut buffer = Vec::new();
    sample().write_csv(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
        lines[0],
        "date,field,model_kind,predicted,actual,lower_bound,upper_bound,model_label,error"
    );
    assert_eq!(lines.len(), 9);
    assert_eq!(lines[2], "2024-01-02,Close,LSTM,,100.0,,,,insufficient_history");
    assert!(lines[1].starts_with("2024-01-02,Close,ARIMA,101.0,100.0,99.0,103.0,"));

    let mut wide = Vec::new();
    sample().write_wide_csv(&mut wide).unwrap();
    let wide = String::from_utf8(wide).unwrap();
    assert_eq!(
        wide.lines().next().unwrap(),
        "Date,ARIMA_Close,LSTM_Close,Actual_Close"
    );
    assert_eq!(wide.lines().nth(1).unwrap(), "2024-01-02,101,,100");
}

#[test]
fn test_json_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    sample().to_json_file(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["records"].as_array().unwrap().len(), 8);
    assert_eq!(value["summary"].as_array().unwrap().len(), 2);
    assert_eq!(value["records"][0]["model_kind"], "ARIMA");
}

#[test]
fn test_exact_predictions_score_zero() {
    let results = ResultSet::new(
        (2..=5)
            .map(|d| predicted(day(d), ModelKind::Arima, 100.0 + d as f64, Some(100.0 + d as f64)))
            .collect(),
    );
    let metrics = results.metrics(ModelKind::Arima, PriceField::Close).unwrap();
    assert_eq!(metrics.count, 4);
    assert_eq!(metrics.rmse, 0.0);
    assert_eq!(metrics.mape, 0.0);
    assert_eq!(metrics.mae, 0.0);
}

#[test]
fn test_configured_metrics_window() {
    let results = sample();
    assert_eq!(results.metrics_window(), 20);
    assert!(results.summary().iter().all(|s| s.rolling.is_none()));

    let results = results.with_metrics_window(2);
    assert_eq!(
        results.default_rolling_metrics(ModelKind::Arima, PriceField::Close),
        results.rolling_metrics(ModelKind::Arima, PriceField::Close, 2)
    );
    let summary = results.summary();
    assert_relative_eq!(summary[0].rolling.unwrap().rmse, 0.5f64.sqrt(), epsilon = 1e-12);
    assert_relative_eq!(summary[1].rolling.unwrap().rmse, 4.0, epsilon = 1e-12);

    let value: serde_json::Value = serde_json::from_str(&results.to_json().unwrap()).unwrap();
    assert_eq!(value["metrics_window"], 2);
}
