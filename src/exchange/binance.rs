use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::trading::execution::{BuyFill, SellFill};

/// Placeholder venue. Every call fails so a misconfigured run aborts
/// before touching any funds.
#[derive(Debug, Default)]
pub struct BinanceExchange;

impl BinanceExchange {
    pub fn new() -> Self {
        Self
    }

    fn refuse(action: &'static str) -> ExchangeError {
        ExchangeError::NotImplemented {
            venue: "Binance",
            action,
        }
    }
}

#[async_trait]
impl Exchange for BinanceExchange {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn get_current_price(&mut self) -> Result<f64> {
        Err(Self::refuse("fetch prices").into())
    }

    async fn buy(&mut self, _notional: f64, _price: f64, _ts: DateTime<Utc>) -> Result<BuyFill> {
        Err(Self::refuse("buy").into())
    }

    async fn sell(
        &mut self,
        _quantity: f64,
        _price: f64,
        _ts: DateTime<Utc>,
        _reason: &str,
    ) -> Result<SellFill> {
        Err(Self::refuse("sell").into())
    }
}
