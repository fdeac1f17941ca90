use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::MarketData;
use crate::trading::{AccountState, TradingEngine};

use super::data_fetcher::load_csv_prices;

/// What a finished run hands to reporting.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: AccountState,
    pub market: Option<MarketData>,
    pub start_time: DateTime<Utc>,
}

/// Drives the engine in replay (`test`) or live-price (`real`) mode,
/// loading and persisting the account snapshot around the run.
pub struct Simulator {
    pub engine: TradingEngine,
    pub config: Config,
}

impl Simulator {
    pub fn new(engine: TradingEngine, config: Config) -> Self {
        Self { engine, config }
    }

    fn initial_state(&self, fresh: bool) -> AccountState {
        let params = self.engine.params();
        if fresh {
            info!("Starting from a fresh account (existing state ignored)");
            let mut state = AccountState::new(params.initial_capital, Utc::now());
            state.reset_if_new_run(params);
            return state;
        }
        AccountState::load_or_new(&self.config.state_file, params, Utc::now())
    }

    /// Replay the CSV price file at `csv_file`.
    pub async fn run_test(&mut self, csv_file: &Path, fresh: bool) -> Result<RunSummary> {
        let market = load_csv_prices(csv_file, self.engine.params().fx_rate)?;
        let mut state = self.initial_state(fresh);

        let Some(ts) = market.timestamp_at(state.cursor) else {
            warn!(
                "State cursor {} is past the end of {} ({} points), nothing to replay",
                state.cursor,
                csv_file.display(),
                market.len()
            );
            return Ok(RunSummary {
                start_time: state.current_operation_time,
                state,
                market: Some(market),
            });
        };
        state.current_operation_time = ts;
        let start_time = ts;

        info!("=== SIMULATION START (historical) ===");
        info!(
            "Operations {}..={} over {} prices from {}",
            state.current_operation,
            self.engine.params().operations,
            market.len(),
            csv_file.display()
        );

        self.engine
            .run_operations(Some(&market), &mut state, Some(&self.config.state_file))
            .await?;
        self.persist(&state);

        Ok(RunSummary {
            state,
            market: Some(market),
            start_time,
        })
    }

    /// Run against the configured exchange's prices.
    pub async fn run_real(&mut self, fresh: bool) -> Result<RunSummary> {
        let mut state = self.initial_state(fresh);
        let start_time = state.current_operation_time;

        info!(
            "=== SIMULATION START ({}) ===",
            self.engine.exchange_name()
        );

        self.engine
            .run_operations(None, &mut state, Some(&self.config.state_file))
            .await?;
        self.persist(&state);

        Ok(RunSummary {
            state,
            market: None,
            start_time,
        })
    }

    fn persist(&self, state: &AccountState) {
        if let Err(e) = state.save(&self.config.state_file) {
            warn!(
                "Failed to persist state to {}: {}",
                self.config.state_file.display(),
                e
            );
        }
    }
}
