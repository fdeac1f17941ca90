use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::TradingParams;
use crate::exchange::SimulatedExchange;
use crate::models::{MarketData, MarketTrend};
use crate::trading::TradingEngine;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Market with one price per hour starting at `t0()`.
pub fn hourly_market(prices: &[f64]) -> MarketData {
    let timestamps = (0..prices.len())
        .map(|i| t0() + Duration::hours(i as i64))
        .collect();
    MarketData::from_raw(timestamps, prices.to_vec())
}

/// One operation, one buy tranche filled at the first tick, one sell tranche
/// at +1%, no fees.
pub fn single_tranche_params() -> TradingParams {
    TradingParams {
        operations: 1,
        fee_rate: 0.0,
        tranches_buy: vec![1.0],
        levels_buy: vec![0.0],
        tranches_sell: vec![1.0],
        levels_sell: vec![0.01],
        ..TradingParams::default()
    }
}

/// Engine backed by a seeded mock exchange using the params' fee rate.
pub fn engine_with(params: TradingParams) -> TradingEngine {
    let exchange = SimulatedExchange::new(params.fee_rate, 100_000.0, Some(7), MarketTrend::Neutral);
    TradingEngine::new(params, Box::new(exchange))
}
