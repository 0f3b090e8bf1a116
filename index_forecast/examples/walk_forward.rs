use chrono::{Duration, NaiveDate};
use index_forecast::{
    ForecastConfig, LstmConfig, PriceField, RawPriceRow, RawPriceTable, TradingCalendar,
    WalkForwardEvaluator,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Index Forecast: Walk-Forward Example");
    println!("====================================\n");

    // Usage: walk_forward [prices.csv] [config.json]
    let args: Vec<String> = env::args().collect();
    let table = match args.get(1) {
        Some(path) => {
            println!("Loading prices from {}...", path);
            RawPriceTable::from_csv(path)?
        }
        None => {
            println!("No CSV given, generating two years of sample prices...");
            create_sample_table()
        }
    };
    let config = match args.get(2) {
        Some(path) => ForecastConfig::from_json_file(path)?,
        None => quick_config(),
    };
    println!("{} raw rows loaded\n", table.len());

    let mut evaluator = WalkForwardEvaluator::new(config)?;
    let results = evaluator.run(&table)?;

    println!("Walk-forward metrics:");
    for summary in results.summary() {
        match summary.metrics {
            Some(metrics) => println!("  {:<5} {:<5} {}", summary.model_kind, summary.field, metrics),
            None => println!(
                "  {:<5} {:<5} no scored predictions",
                summary.model_kind, summary.field
            ),
        }
    }

    println!("\nNext trading day forecast:");
    for record in results.next_day() {
        if let (Some(point), Some(lower), Some(upper)) = (
            record.predicted_value(),
            record.lower_bound(),
            record.upper_bound(),
        ) {
            println!(
                "  {} {} {:<5} {:.2} [{:.2}, {:.2}]",
                record.date(),
                record.field(),
                record.model_kind(),
                point,
                lower,
                upper
            );
        }
    }

    results.to_csv_file("forecast_results.csv")?;
    results.to_json_file("forecast_results.json")?;
    println!("\nResults written to forecast_results.csv and forecast_results.json");

    Ok(())
}

/// A small network and a short evaluation span so the example runs quickly
fn quick_config() -> ForecastConfig {
    ForecastConfig {
        lookback_window: 20,
        rolling_window_days: Some(250),
        target_fields: vec![PriceField::Open, PriceField::Close],
        lstm: LstmConfig {
            hidden_sizes: vec![16, 8],
            epochs: 2,
            ..LstmConfig::default()
        },
        ..ForecastConfig::default()
    }
}

fn create_sample_table() -> RawPriceTable {
    let mut rng = StdRng::seed_from_u64(42);
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap_or(NaiveDate::MIN);
    let days = TradingCalendar::weekdays().trading_days(start, start + Duration::days(730));

    let mut close: f64 = 17_500.0;
    let rows = days
        .into_iter()
        .map(|date| {
            let open = close * (1.0 + rng.gen_range(-0.004..0.004));
            close = open * (1.0 + 0.0003 + rng.gen_range(-0.01..0.01));
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
            RawPriceRow::new(date, open, high, low, close)
        })
        .collect();
    RawPriceTable::new(rows)
}
