use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::{Path, PathBuf};

use tranche_trader::config::TradingParams;
use tranche_trader::exchange::{Exchange, SimulatedExchange};
use tranche_trader::models::{MarketData, MarketTrend};
use tranche_trader::trading::TradingEngine;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

/// Hourly series starting at `start_time()`.
pub fn hourly(prices: &[f64]) -> MarketData {
    let timestamps = (0..prices.len())
        .map(|i| start_time() + Duration::hours(i as i64))
        .collect();
    MarketData::from_raw(timestamps, prices.to_vec())
}

/// Fee-free params buying everything at the first tick and selling once the
/// whole position is up 1%.
pub fn all_in_params(operations: u32) -> TradingParams {
    TradingParams {
        initial_capital: 10_000.0,
        operations,
        fee_rate: 0.0,
        fx_rate: 1.0,
        tranches_buy: vec![1.0],
        levels_buy: vec![0.0],
        tranches_sell: vec![1.0],
        levels_sell: vec![0.01],
        ..TradingParams::default()
    }
}

pub fn mock(params: &TradingParams, seed: u64) -> Box<dyn Exchange> {
    Box::new(SimulatedExchange::new(
        params.fee_rate,
        100_000.0,
        Some(seed),
        MarketTrend::Neutral,
    ))
}

pub fn engine(params: TradingParams) -> TradingEngine {
    let exchange = mock(&params, 42);
    TradingEngine::new(params, exchange)
}

/// Write a `Datetime,Price_USD` CSV with hourly rows from `start_time()`.
pub fn write_csv(dir: &Path, prices: &[f64]) -> PathBuf {
    let path = dir.join("prices.csv");
    let mut body = String::from("Datetime,Price_USD\n");
    for (i, price) in prices.iter().enumerate() {
        let ts = start_time() + Duration::hours(i as i64);
        body.push_str(&format!("{},{}\n", ts.format("%Y-%m-%d %H:%M:%S"), price));
    }
    std::fs::write(&path, body).unwrap();
    path
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
