use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const FRACTION_TOLERANCE: f64 = 1e-6;

/// Strategy parameters. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingParams {
    pub initial_capital: f64,
    pub operations: u32,
    pub profit_target: f64,
    pub stop_loss: f64,
    pub fee_rate: f64,
    /// USD to quote-currency conversion applied to loaded prices.
    pub fx_rate: f64,
    /// Operations skipped after a full stop-loss.
    pub cooldown_steps: u32,
    pub max_escalations: u32,
    pub tranches_buy: Vec<f64>,
    pub levels_buy: Vec<f64>,
    pub tranches_sell: Vec<f64>,
    pub levels_sell: Vec<f64>,
    pub min_early_profit: f64,
    pub early_exit_time_fraction: f64,
    pub max_duration_hours: u32,
    pub min_stop_loss_hours: u32,
    pub max_steps_in: u32,
    pub min_steps_between_tranches: u32,
    /// Size tranches from the cash held when the operation started instead
    /// of the cash left after earlier tranches.
    pub fixed_tranche_allocation: bool,
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            operations: 30,
            profit_target: 0.1,
            stop_loss: -0.05,
            fee_rate: 0.002,
            fx_rate: 5.5,
            cooldown_steps: 5,
            max_escalations: 3,
            tranches_buy: vec![0.2, 0.3, 0.5],
            levels_buy: vec![-0.01, -0.02, -0.03],
            tranches_sell: vec![0.2, 0.3, 0.5],
            levels_sell: vec![0.01, 0.03, 0.05],
            min_early_profit: 0.03,
            early_exit_time_fraction: 0.5,
            max_duration_hours: 24,
            min_stop_loss_hours: 6,
            max_steps_in: 168,
            min_steps_between_tranches: 1,
            fixed_tranche_allocation: true,
        }
    }
}

impl TradingParams {
    /// Check the tranche ladders and scalar bounds. Runs once at startup; a
    /// failure aborts the run before any operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tranches_buy.len() != self.levels_buy.len() {
            return Err(ConfigError::BuyLengthMismatch {
                tranches: self.tranches_buy.len(),
                levels: self.levels_buy.len(),
            });
        }
        if self.tranches_sell.len() != self.levels_sell.len() {
            return Err(ConfigError::SellLengthMismatch {
                tranches: self.tranches_sell.len(),
                levels: self.levels_sell.len(),
            });
        }

        if let Some(&f) = self
            .tranches_buy
            .iter()
            .chain(self.tranches_sell.iter())
            .find(|&&f| f <= 0.0)
        {
            return Err(ConfigError::FractionNotPositive(f));
        }

        let buy_sum: f64 = self.tranches_buy.iter().sum();
        if (buy_sum - 1.0).abs() > FRACTION_TOLERANCE {
            return Err(ConfigError::BuyFractionSum(buy_sum));
        }
        let sell_sum: f64 = self.tranches_sell.iter().sum();
        if (sell_sum - 1.0).abs() > FRACTION_TOLERANCE {
            return Err(ConfigError::SellFractionSum(sell_sum));
        }

        if let Some(&l) = self.levels_buy.iter().find(|&&l| l >= 0.0) {
            return Err(ConfigError::BuyLevelNotNegative(l));
        }
        if let Some(&l) = self.levels_sell.iter().find(|&&l| l <= 0.0) {
            return Err(ConfigError::SellLevelNotPositive(l));
        }

        if self.initial_capital <= 0.0 {
            return Err(invalid("initial_capital", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(invalid("fee_rate", "must be in [0, 1)"));
        }
        if self.fx_rate <= 0.0 {
            return Err(invalid("fx_rate", "must be positive"));
        }
        if self.max_duration_hours == 0 {
            return Err(invalid("max_duration_hours", "must be at least 1"));
        }
        if self.stop_loss >= 0.0 {
            return Err(invalid("stop_loss", "must be negative"));
        }
        if self.profit_target <= 0.0 {
            return Err(invalid("profit_target", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.early_exit_time_fraction) {
            return Err(invalid("early_exit_time_fraction", "must be in [0, 1]"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

/// Process-level settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub state_file: PathBuf,
    pub log_file: PathBuf,
    pub log_level: String,
    /// Seed for the synthetic price walk. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Starting price of the synthetic walk, in quote currency.
    pub synthetic_start_price: f64,
    /// Timezone whose midnight triggers the daily chart in real mode.
    pub report_timezone: Tz,
    pub coingecko_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let root = PathBuf::from(env("TRADER_HOME", "."));
        let outputs_dir = root.join(env("OUTPUTS_DIR", "outputs"));

        Config {
            data_dir: root.join(env("DATA_DIR", "data")),
            state_file: outputs_dir.join("bot_state.json"),
            log_file: outputs_dir.join("bot_log.txt"),
            outputs_dir,
            log_level: env("LOG_LEVEL", "info"),
            seed: std::env::var("SIM_SEED").ok().and_then(|s| s.parse().ok()),
            synthetic_start_price: env("SYNTHETIC_START_PRICE", "654139.18")
                .parse()
                .unwrap_or(654_139.18),
            report_timezone: env("REPORT_TZ", "America/Sao_Paulo")
                .parse()
                .unwrap_or(chrono_tz::America::Sao_Paulo),
            coingecko_api_key: std::env::var("COINGECKO_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        }
    }

    /// Config rooted at `root`, ignoring the environment. Used by tests.
    pub fn rooted_at(root: &Path) -> Self {
        let outputs_dir = root.join("outputs");
        Config {
            data_dir: root.join("data"),
            state_file: outputs_dir.join("bot_state.json"),
            log_file: outputs_dir.join("bot_log.txt"),
            outputs_dir,
            log_level: "info".to_string(),
            seed: Some(42),
            synthetic_start_price: 654_139.18,
            report_timezone: chrono_tz::America::Sao_Paulo,
            coingecko_api_key: None,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.outputs_dir)
    }
}
