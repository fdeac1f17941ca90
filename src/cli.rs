use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::backtesting::FetchRange;
use crate::config::TradingParams;
use crate::exchange::Venue;
use crate::models::MarketTrend;

#[derive(Debug, Parser)]
#[command(
    name = "tranche-trader",
    about = "Tranche-based BTC trading simulator and price downloader"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download hourly BTC/USD prices from CoinGecko into the data directory.
    Fetch {
        /// Days to fetch, counting back from now.
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Start date (YYYY-MM-DD). Requires --end-date.
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Requires --start-date.
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Replay a historical CSV price file.
    Test {
        #[command(flatten)]
        trading: TradingArgs,

        /// CSV with Price_USD or Close, and Datetime or Timestamp_ms.
        #[arg(long)]
        csv_file: PathBuf,
    },
    /// Run against exchange prices (mock by default).
    Real {
        #[command(flatten)]
        trading: TradingArgs,

        /// mock, binance or coinbase.
        #[arg(long, default_value = "mock")]
        exchange: Venue,

        /// Bias of the mock price walk: neutral, bullish or bearish.
        #[arg(long, default_value = "neutral")]
        trend: MarketTrend,

        /// Draw the chart even outside the midnight window.
        #[arg(long, default_value_t = false)]
        force_graph: bool,
    },
}

impl Commands {
    pub fn fetch_range(&self) -> Option<FetchRange> {
        match self {
            Commands::Fetch {
                days,
                start_date,
                end_date,
            } => Some(FetchRange {
                days: *days,
                start_date: *start_date,
                end_date: *end_date,
            }),
            _ => None,
        }
    }
}

/// Strategy flags shared by `test` and `real`.
#[derive(Debug, Clone, Args)]
pub struct TradingArgs {
    /// Initial capital in BRL.
    #[arg(long, default_value_t = 10_000.0)]
    pub initial_capital: f64,

    #[arg(long, default_value_t = 30)]
    pub operations: u32,

    /// Whole-position profit target (0.1 = 10%).
    #[arg(long, default_value_t = 0.1)]
    pub profit_target: f64,

    /// Whole-position stop-loss (-0.05 = -5%).
    #[arg(long, default_value_t = -0.05, allow_negative_numbers = true)]
    pub stop_loss: f64,

    #[arg(long, default_value_t = 0.002)]
    pub fee_rate: f64,

    /// USD to BRL conversion rate.
    #[arg(long, default_value_t = 5.5)]
    pub fx_rate: f64,

    /// Operations skipped after a full stop-loss.
    #[arg(long, default_value_t = 5)]
    pub cooldown_steps: u32,

    /// Maximum consecutive bet doublings.
    #[arg(long, default_value_t = 3)]
    pub max_escalations: u32,

    #[arg(long, num_args = 1.., default_values_t = [0.2, 0.3, 0.5])]
    pub tranches_buy: Vec<f64>,

    #[arg(long, num_args = 1.., default_values_t = [-0.01, -0.02, -0.03], allow_negative_numbers = true)]
    pub levels_buy: Vec<f64>,

    #[arg(long, num_args = 1.., default_values_t = [0.2, 0.3, 0.5])]
    pub tranches_sell: Vec<f64>,

    #[arg(long, num_args = 1.., default_values_t = [0.01, 0.03, 0.05])]
    pub levels_sell: Vec<f64>,

    #[arg(long, default_value_t = 0.03)]
    pub min_early_profit: f64,

    #[arg(long, default_value_t = 0.5)]
    pub early_exit_time_fraction: f64,

    #[arg(long, default_value_t = 24)]
    pub max_duration_hours: u32,

    #[arg(long, default_value_t = 6)]
    pub min_stop_loss_hours: u32,

    /// Steps allowed to complete the scale-in.
    #[arg(long, default_value_t = 168)]
    pub max_steps_in: u32,

    /// Size every tranche from the cash left at fill time instead of the
    /// cash held when the operation started.
    #[arg(long, default_value_t = false)]
    pub floating_allocation: bool,

    /// Seed for the mock price walk.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Ignore any saved account state.
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Skip the PNG chart.
    #[arg(long, default_value_t = false)]
    pub no_graph: bool,
}

impl TradingArgs {
    pub fn to_params(&self) -> TradingParams {
        TradingParams {
            initial_capital: self.initial_capital,
            operations: self.operations,
            profit_target: self.profit_target,
            stop_loss: self.stop_loss,
            fee_rate: self.fee_rate,
            fx_rate: self.fx_rate,
            cooldown_steps: self.cooldown_steps,
            max_escalations: self.max_escalations,
            tranches_buy: self.tranches_buy.clone(),
            levels_buy: self.levels_buy.clone(),
            tranches_sell: self.tranches_sell.clone(),
            levels_sell: self.levels_sell.clone(),
            min_early_profit: self.min_early_profit,
            early_exit_time_fraction: self.early_exit_time_fraction,
            max_duration_hours: self.max_duration_hours,
            min_stop_loss_hours: self.min_stop_loss_hours,
            max_steps_in: self.max_steps_in,
            fixed_tranche_allocation: !self.floating_allocation,
            ..TradingParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_trading_params() {
        let cli = Cli::try_parse_from(["tranche-trader", "test", "--csv-file", "p.csv"]).unwrap();
        let Commands::Test { trading, csv_file } = cli.command else {
            panic!("expected test command");
        };
        assert_eq!(csv_file, PathBuf::from("p.csv"));
        assert_eq!(trading.to_params(), TradingParams::default());
    }

    #[test]
    fn parses_ladders_and_negative_values() {
        let cli = Cli::try_parse_from([
            "tranche-trader",
            "real",
            "--exchange",
            "coinbase",
            "--trend",
            "bearish",
            "--stop-loss",
            "-0.1",
            "--levels-buy",
            "-0.02",
            "-0.04",
            "--tranches-buy",
            "0.5",
            "0.5",
            "--seed",
            "9",
        ])
        .unwrap();
        let Commands::Real {
            trading,
            exchange,
            trend,
            force_graph,
        } = cli.command
        else {
            panic!("expected real command");
        };
        assert_eq!(exchange, Venue::Coinbase);
        assert_eq!(trend, MarketTrend::Bearish);
        assert!(!force_graph);
        let params = trading.to_params();
        assert_eq!(params.stop_loss, -0.1);
        assert_eq!(params.levels_buy, vec![-0.02, -0.04]);
        assert_eq!(params.tranches_buy, vec![0.5, 0.5]);
        assert_eq!(trading.seed, Some(9));
    }

    #[test]
    fn fetch_dates_parse() {
        let cli = Cli::try_parse_from([
            "tranche-trader",
            "fetch",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-02-01",
        ])
        .unwrap();
        let range = cli.command.fetch_range().unwrap();
        assert_eq!(range.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(range.days, 30);
    }

    #[test]
    fn unknown_exchange_rejected() {
        assert!(Cli::try_parse_from(["tranche-trader", "real", "--exchange", "kraken"]).is_err());
    }
}
