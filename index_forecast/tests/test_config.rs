use chrono::NaiveDate;
use index_forecast::config::{ForecastConfig, GapPolicy, RegressorSpec};
use index_forecast::data::PriceField;
use index_forecast::error::ForecastError;
use index_forecast::models::ArimaOrder;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::io::Write;

#[test]
fn test_config_file_round_trip() {
    let mut config = ForecastConfig::default();
    config.lookback_window = 30;
    config.target_fields = vec![PriceField::Close];
    config.as_of_date = NaiveDate::from_ymd_opt(2024, 5, 31);
    config.preprocess.regressors.push(RegressorSpec::Column {
        name: "vix".to_string(),
    });

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

    let loaded = ForecastConfig::from_json_file(file.path()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_regressor_json_shape() {
    let config = ForecastConfig::from_json_str(
        r#"{
            "target_fields": ["Close"],
            "arima": {"fallback_order": {"p": 0, "d": 1, "q": 1}},
            "preprocess": {
                "gap_policy": "forward_fill",
                "regressors": [
                    {"kind": "date_range_dummy", "name": "election", "start": "2024-04-19", "end": "2024-06-04"},
                    {"kind": "column", "name": "vix"}
                ]
            }
        }"#,
    )
    .unwrap();

    assert_eq!(config.target_fields, vec![PriceField::Close]);
    assert_eq!(config.arima.fallback_order, ArimaOrder::new(0, 1, 1));
    assert_eq!(config.preprocess.gap_policy, GapPolicy::ForwardFill);
    assert_eq!(config.preprocess.regressors.len(), 2);
    assert_eq!(config.preprocess.regressors[0].name(), "election");
    assert_eq!(
        config.preprocess.regressors[0].dummy_value(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
        Some(1.0)
    );
    assert_eq!(config.preprocess.regressors[1].dummy_value(NaiveDate::MIN), None);
}

#[rstest]
#[case(r#"{"lookback_window": 0}"#)]
#[case(r#"{"lookback_window": 100, "rolling_window_days": 80}"#)]
#[case(r#"{"retrain_cadence": 0}"#)]
#[case(r#"{"confidence_level": 1.0}"#)]
#[case(r#"{"target_fields": []}"#)]
#[case(r#"{"target_fields": ["Open", "Open"]}"#)]
#[case(r#"{"evaluation_start_date": "2024-06-01", "evaluation_end_date": "2024-05-01"}"#)]
#[case(r#"{"lstm": {"dropout": 1.0}}"#)]
#[case(r#"{"lstm": {"hidden_sizes": []}}"#)]
#[case(r#"{"arima": {"max_d": 0}}"#)]
#[case(r#"{"preprocess": {"regressors": [{"kind": "column", "name": "x"}, {"kind": "column", "name": "x"}]}}"#)]
fn test_invalid_configs_rejected(#[case] json: &str) {
    let result = ForecastConfig::from_json_str(json);
    assert!(
        matches!(result, Err(ForecastError::InvalidParameter(_))),
        "{} should be rejected, got {:?}",
        json,
        result
    );
}

#[test]
fn test_malformed_json() {
    assert!(matches!(
        ForecastConfig::from_json_str(r#"{"gap_policy": }"#),
        Err(ForecastError::Json(_))
    ));
}

#[test]
fn test_expanding_window_allowed() {
    let config = ForecastConfig::from_json_str(r#"{"rolling_window_days": null}"#).unwrap();
    assert_eq!(config.rolling_window_days, None);
}
