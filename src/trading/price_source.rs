use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::exchange::Exchange;
use crate::models::MarketData;
use crate::trading::account::AccountState;

/// One observed price and the time it applies to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTick {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Hourly price stream for the engine: replays a bound series, or asks the
/// exchange when there is none.
///
/// The account cursor counts consumed steps in both modes. Once a bound
/// series runs out the source returns `None` and never falls back to the
/// exchange.
pub struct PriceSource<'a> {
    market: Option<&'a MarketData>,
    clock: DateTime<Utc>,
}

impl<'a> PriceSource<'a> {
    pub fn new(market: Option<&'a MarketData>, start: DateTime<Utc>) -> Self {
        Self {
            market,
            clock: start,
        }
    }

    /// Restart the synthetic clock, so the next generated tick is stamped `at`.
    pub fn set_clock(&mut self, at: DateTime<Utc>) {
        self.clock = at;
    }

    pub fn is_exhausted(&self, state: &AccountState) -> bool {
        self.market.is_some_and(|m| state.cursor >= m.len())
    }

    /// Timestamp of the next unconsumed series point, if any.
    pub fn peek_timestamp(&self, state: &AccountState) -> Option<DateTime<Utc>> {
        self.market.and_then(|m| m.timestamp_at(state.cursor))
    }

    pub async fn next(
        &mut self,
        exchange: &mut dyn Exchange,
        state: &mut AccountState,
    ) -> Result<Option<PriceTick>> {
        let tick = match self.market {
            Some(market) => match market.get(state.cursor) {
                Some(point) => PriceTick {
                    price: point.price,
                    timestamp: point.timestamp,
                },
                None => return Ok(None),
            },
            None => PriceTick {
                price: exchange.get_current_price().await?,
                timestamp: self.clock,
            },
        };

        state.cursor += 1;
        state.last_price = tick.price;
        self.clock = tick.timestamp + Duration::hours(1);
        Ok(Some(tick))
    }

    /// Skip one step without observing it, capped at the series end.
    pub fn skip(&mut self, state: &mut AccountState) {
        match self.market {
            Some(market) => state.cursor = (state.cursor + 1).min(market.len()),
            None => {
                state.cursor += 1;
                self.clock += Duration::hours(1);
            }
        }
    }
}
