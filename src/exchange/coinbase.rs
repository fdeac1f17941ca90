use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::trading::execution::{BuyFill, SellFill};

const BASE_URL: &str = "https://api.coinbase.com";
const PRODUCT: &str = "BTC-USD";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct TickerResponse {
    trades: Vec<TickerTrade>,
}

#[derive(Debug, Deserialize)]
struct TickerTrade {
    price: String,
}

/// Read-only Coinbase venue. Reads the public ticker and converts it to the
/// quote currency; order placement is refused.
pub struct CoinbaseExchange {
    client: Client,
    base_url: String,
    fx_rate: f64,
    last_request: Option<Instant>,
}

impl CoinbaseExchange {
    pub fn new(fx_rate: f64) -> Self {
        Self::with_base_url(BASE_URL, fx_rate)
    }

    pub fn with_base_url(base_url: &str, fx_rate: f64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            fx_rate,
            last_request: None,
        }
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn refuse(action: &'static str) -> ExchangeError {
        ExchangeError::NotImplemented {
            venue: "Coinbase",
            action,
        }
    }
}

fn parse_ticker(data: TickerResponse) -> Result<f64, ExchangeError> {
    data.trades
        .first()
        .and_then(|t| t.price.parse::<f64>().ok())
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ExchangeError::BadResponse {
            venue: "Coinbase",
            detail: "no price in ticker response".to_string(),
        })
}

#[async_trait]
impl Exchange for CoinbaseExchange {
    fn name(&self) -> &'static str {
        "coinbase"
    }

    async fn get_current_price(&mut self) -> Result<f64> {
        self.rate_limit().await;

        let url = format!(
            "{}/api/v3/brokerage/market/products/{}/ticker",
            self.base_url, PRODUCT
        );

        let resp = self
            .client
            .get(&url)
            .query(&[("limit", "1")])
            .send()
            .await
            .map_err(ExchangeError::from)
            .context("Failed to fetch ticker")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::BadResponse {
                venue: "Coinbase",
                detail: format!("{}: {}", status, body),
            }
            .into());
        }

        let data: TickerResponse = resp
            .json()
            .await
            .map_err(ExchangeError::from)
            .context("Failed to parse ticker")?;

        let usd = parse_ticker(data)?;
        debug!(usd, fx = self.fx_rate, "Coinbase ticker");
        Ok(usd * self.fx_rate)
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
