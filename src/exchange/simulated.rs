use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::exchange::Exchange;
use crate::models::MarketTrend;
use crate::trading::execution::{BuyFill, FeeModel, SellFill};

pub const DEFAULT_START_PRICE: f64 = 654_139.18;

/// Paper venue: a seeded multiplicative random walk plus the flat fee model.
pub struct SimulatedExchange {
    rng: StdRng,
    last_price: f64,
    trend: MarketTrend,
    fees: FeeModel,
}

impl SimulatedExchange {
    pub fn new(fee_rate: f64, start_price: f64, seed: Option<u64>, trend: MarketTrend) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let last_price = if start_price > 0.0 {
            start_price
        } else {
            error!(start_price, "Non-positive start price, using default");
            DEFAULT_START_PRICE
        };
        Self {
            rng,
            last_price,
            trend,
            fees: FeeModel::new(fee_rate),
        }
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    pub fn trend(&self) -> MarketTrend {
        self.trend
    }

    /// Advance the walk by one step. A step that would leave the price
    /// non-positive is discarded and the last valid price repeated.
    pub fn next_price(&mut self) -> f64 {
        let (lo, hi, scale) = self.trend.bounds();
        let draw: f64 = self.rng.gen_range(lo..hi);
        let candidate = self.last_price * (1.0 + draw / scale);

        if !candidate.is_finite() || candidate <= 0.0 {
            error!(
                last = self.last_price,
                candidate, "Synthetic price fault, reusing last valid price"
            );
            return self.last_price;
        }

        self.last_price = candidate;
        candidate
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_current_price(&mut self) -> Result<f64> {
        Ok(self.next_price())
    }

    async fn buy(&mut self, notional: f64, price: f64, ts: DateTime<Utc>) -> Result<BuyFill> {
        let fill = self.fees.buy(notional, price);
        if !fill.is_empty() {
            info!(
                "[MOCK] {} - Bought {:.5} BTC at R${:.2} (fee R${:.2})",
                ts.format("%Y-%m-%d %H:%M:%S"),
                fill.quantity,
                price,
                fill.fee
            );
        }
        Ok(fill)
    }

    async fn sell(
        &mut self,
        quantity: f64,
        price: f64,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<SellFill> {
        let fill = self.fees.sell(quantity, price);
        if fill.proceeds > 0.0 {
            info!(
                "[MOCK] {} - Sold {:.5} BTC at R${:.2} (fee R${:.2}) reason: {}",
                ts.format("%Y-%m-%d %H:%M:%S"),
                quantity,
                price,
                fill.fee,
                reason
            );
        }
        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_walk() {
        let mut a = SimulatedExchange::new(0.002, 100_000.0, Some(7), MarketTrend::Neutral);
        let mut b = SimulatedExchange::new(0.002, 100_000.0, Some(7), MarketTrend::Neutral);
        for _ in 0..50 {
            assert_eq!(a.next_price(), b.next_price());
        }
    }

    #[test]
    fn steps_stay_within_trend_bounds() {
        for trend in [MarketTrend::Bullish, MarketTrend::Bearish, MarketTrend::Neutral] {
            let (lo, hi, scale) = trend.bounds();
            let mut ex = SimulatedExchange::new(0.0, 100_000.0, Some(3), trend);
            let mut prev = ex.last_price();
            for _ in 0..200 {
                let next = ex.next_price();
                let step = (next / prev - 1.0) * scale;
                assert!(step >= lo - 1e-9 && step <= hi + 1e-9);
                assert!(next > 0.0);
                prev = next;
            }
        }
    }

    #[test]
    fn non_positive_start_falls_back() {
        let ex = SimulatedExchange::new(0.002, -1.0, Some(1), MarketTrend::Neutral);
        assert_eq!(ex.last_price(), DEFAULT_START_PRICE);
    }

    #[tokio::test]
    async fn fills_use_fee_model() {
        let mut ex = SimulatedExchange::new(0.01, 100.0, Some(1), MarketTrend::Neutral);
        let buy = ex.buy(100.0, 10.0, Utc::now()).await.unwrap();
        assert!((buy.quantity - 9.9).abs() < 1e-12);
        let sell = ex.sell(1.0, 10.0, Utc::now(), "test").await.unwrap();
        assert!((sell.fee - 0.1).abs() < 1e-12);

        let empty = ex.buy(0.0, 10.0, Utc::now()).await.unwrap();
        assert!(empty.is_empty());
    }
}
