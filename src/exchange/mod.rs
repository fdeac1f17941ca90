pub mod binance;
pub mod coinbase;
pub mod simulated;

pub use binance::BinanceExchange;
pub use coinbase::CoinbaseExchange;
pub use simulated::SimulatedExchange;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::trading::execution::{BuyFill, SellFill};

/// Venue the trading engine talks to. Prices are in the quote currency.
#[async_trait]
pub trait Exchange: Send {
    fn name(&self) -> &'static str;

    async fn get_current_price(&mut self) -> Result<f64>;

    /// Spend `notional` at `price`. Invalid input yields an empty fill.
    async fn buy(&mut self, notional: f64, price: f64, ts: DateTime<Utc>) -> Result<BuyFill>;

    async fn sell(
        &mut self,
        quantity: f64,
        price: f64,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<SellFill>;
}

/// Venues selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Mock,
    Binance,
    Coinbase,
}

impl std::str::FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Venue::Mock),
            "binance" => Ok(Venue::Binance),
            "coinbase" => Ok(Venue::Coinbase),
            other => Err(format!("unknown exchange '{}'", other)),
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Mock => write!(f, "mock"),
            Venue::Binance => write!(f, "binance"),
            Venue::Coinbase => write!(f, "coinbase"),
        }
    }
}
