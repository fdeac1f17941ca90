use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::TradingParams;
use crate::error::StateError;
use crate::models::{ExitReason, Tranche};
use crate::trading::engine::OperationOutcome;

/// Price assumed when a fresh account has never seen a quote.
pub const DEFAULT_LAST_PRICE: f64 = 100_000.0;

/// A buy or sell marker on the price chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Position in the consumed price stream.
    pub index: usize,
    pub price: f64,
}

/// Detail row for an operation that traded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: u32,
    pub profit: f64,
    pub tax: f64,
    pub fees: f64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub exit_reason: ExitReason,
    pub quantity: f64,
    pub cost: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Running ledger of the strategy, persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountState {
    pub cash: f64,
    /// Open position, oldest fill first.
    pub open_tranches: Vec<Tranche>,
    pub last_price: f64,
    pub total_profit: f64,
    pub total_tax: f64,
    pub total_fees: f64,
    /// Realized profit indexed by operation number minus one.
    pub profits: Vec<f64>,
    pub sell_prices: Vec<f64>,
    /// Percent.
    pub buy_variations: Vec<f64>,
    /// Percent.
    pub sell_variations: Vec<f64>,
    pub buy_points: Vec<Marker>,
    pub sell_points: Vec<Marker>,
    /// Cash after every operation that traded.
    pub balance_history: Vec<f64>,
    pub operations: Vec<OperationRecord>,
    /// Number of price steps consumed so far.
    pub cursor: usize,
    pub current_operation_time: DateTime<Utc>,
    pub last_operation_time: DateTime<Utc>,
    /// 1-based number of the next operation to run.
    pub current_operation: u32,
    pub last_exit_reason: Option<ExitReason>,
    pub consecutive_losses: u32,
    pub cooldown_remaining: u32,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            cash: 0.0,
            open_tranches: Vec::new(),
            last_price: 0.0,
            total_profit: 0.0,
            total_tax: 0.0,
            total_fees: 0.0,
            profits: Vec::new(),
            sell_prices: Vec::new(),
            buy_variations: Vec::new(),
            sell_variations: Vec::new(),
            buy_points: Vec::new(),
            sell_points: Vec::new(),
            balance_history: Vec::new(),
            operations: Vec::new(),
            cursor: 0,
            current_operation_time: DateTime::<Utc>::default(),
            last_operation_time: DateTime::<Utc>::default(),
            current_operation: 1,
            last_exit_reason: None,
            consecutive_losses: 0,
            cooldown_remaining: 0,
        }
    }
}

impl AccountState {
    pub fn new(initial_capital: f64, start: DateTime<Utc>) -> Self {
        Self {
            cash: initial_capital,
            last_price: DEFAULT_LAST_PRICE,
            current_operation_time: start,
            last_operation_time: start,
            ..Self::default()
        }
    }

    /// Fill in the starting balances of an empty or freshly defaulted state.
    pub fn reset_if_new_run(&mut self, params: &TradingParams) {
        if self.cash <= 0.0 && self.open_tranches.is_empty() {
            self.cash = params.initial_capital;
        }
        if self.last_price <= 0.0 {
            self.last_price = DEFAULT_LAST_PRICE;
        }
        if self.current_operation == 0 {
            self.current_operation = 1;
        }
    }

    pub fn open_quantity(&self) -> f64 {
        self.open_tranches.iter().map(|t| t.quantity).sum()
    }

    /// Quantity times acquisition price over the open position.
    pub fn open_cost(&self) -> f64 {
        self.open_tranches.iter().map(|t| t.cost()).sum()
    }

    /// Cash debited for the open position: each tranche's notional plus its
    /// buy fee.
    pub fn open_invested(&self) -> f64 {
        self.open_tranches.iter().map(|t| t.invested()).sum()
    }

    pub fn has_open_position(&self) -> bool {
        !self.open_tranches.is_empty()
    }

    /// Cash plus the open position marked at `price`.
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.open_quantity() * price
    }

    /// Fold a finished operation into the running totals and histories.
    pub fn record_outcome(&mut self, outcome: &OperationOutcome) {
        let slot = outcome.operation.saturating_sub(1) as usize;
        if self.profits.len() <= slot {
            self.profits.resize(slot + 1, 0.0);
        }
        self.profits[slot] = outcome.profit;

        self.total_profit += outcome.profit;
        self.total_tax += outcome.tax;
        self.total_fees += outcome.fees;
        self.sell_prices.push(outcome.avg_sell_price);
        self.buy_variations.push(outcome.buy_variation * 100.0);
        self.sell_variations.push(outcome.sell_variation * 100.0);

        self.last_exit_reason = Some(outcome.exit_reason);

        if outcome.traded {
            self.operations.push(OperationRecord {
                operation_id: outcome.operation,
                profit: outcome.profit,
                tax: outcome.tax,
                fees: outcome.fees,
                buy_price: outcome.avg_buy_price,
                sell_price: outcome.avg_sell_price,
                exit_reason: outcome.exit_reason,
                quantity: outcome.quantity,
                cost: outcome.cost,
                start_time: outcome.start_time,
                end_time: outcome.end_time,
            });
            self.balance_history.push(self.cash);
        }

        self.last_operation_time = outcome.end_time;
        self.last_price = outcome.last_price;
        self.current_operation += 1;
    }

    /// Read a snapshot. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, StateError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let state = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "Loaded account state");
        Ok(Some(state))
    }

    /// Load the snapshot at `path`, or start a new account if there is none
    /// or it cannot be read.
    pub fn load_or_new(path: &Path, params: &TradingParams, start: DateTime<Utc>) -> Self {
        let mut state = match Self::load(path) {
            Ok(Some(state)) => state,
            Ok(None) => Self::new(params.initial_capital, start),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable state file, starting fresh");
                Self::new(params.initial_capital, start)
            }
        };
        state.reset_if_new_run(params);
        state
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot atomically: serialize to a sibling temp file, then
    /// rename it over `path`.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let json = self.to_json()?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_err(e)
        })
    }
}
