use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use tranche_trader::backtesting::{fetch_to_csv, RunSummary, SimulationReport, Simulator};
use tranche_trader::cli::{Cli, Commands, TradingArgs};
use tranche_trader::config::Config;
use tranche_trader::exchange::{
    BinanceExchange, CoinbaseExchange, Exchange, SimulatedExchange, Venue,
};
use tranche_trader::logging;
use tranche_trader::models::MarketTrend;
use tranche_trader::trading::TradingEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();
    cfg.ensure_dirs()?;
    logging::init(&cfg.log_level, Some(&cfg.log_file))?;

    match cli.command {
        cmd @ Commands::Fetch { .. } => {
            if let Some(range) = cmd.fetch_range() {
                let path = fetch_to_csv(&cfg, &range).await?;
                println!("Prices saved to {}", path.display());
            }
        }
        Commands::Test { trading, csv_file } => {
            let exchange = mock_exchange(&cfg, &trading, MarketTrend::Neutral);
            let Some(mut sim) = simulator(&cfg, &trading, exchange) else {
                std::process::exit(1);
            };
            let summary = sim.run_test(&csv_file, trading.fresh).await?;
            finish(&cfg, &trading, &summary, true, !trading.no_graph);
        }
        Commands::Real {
            trading,
            exchange,
            trend,
            force_graph,
        } => {
            let venue: Box<dyn Exchange> = match exchange {
                Venue::Mock => mock_exchange(&cfg, &trading, trend),
                Venue::Binance => Box::new(BinanceExchange::new()),
                Venue::Coinbase => Box::new(CoinbaseExchange::new(trading.fx_rate)),
            };
            let Some(mut sim) = simulator(&cfg, &trading, venue) else {
                std::process::exit(1);
            };
            let summary = sim.run_real(trading.fresh).await?;

            let draw = !trading.no_graph && chart_window(&cfg, force_graph);
            finish(&cfg, &trading, &summary, false, draw);
        }
    }

    Ok(())
}

fn mock_exchange(cfg: &Config, trading: &TradingArgs, trend: MarketTrend) -> Box<dyn Exchange> {
    Box::new(SimulatedExchange::new(
        trading.fee_rate,
        cfg.synthetic_start_price,
        trading.seed.or(cfg.seed),
        trend,
    ))
}

/// Validated engine wrapped in a simulator, or `None` after logging why the
/// parameters were rejected.
fn simulator(cfg: &Config, trading: &TradingArgs, exchange: Box<dyn Exchange>) -> Option<Simulator> {
    let params = trading.to_params();
    if let Err(e) = params.validate() {
        error!("Invalid trading parameters: {}", e);
        return None;
    }
    info!(
        "Exchange: {} | capital {:.2} | {} operations",
        exchange.name(),
        params.initial_capital,
        params.operations
    );
    Some(Simulator::new(
        TradingEngine::new(params, exchange),
        cfg.clone(),
    ))
}

#[cfg(feature = "charts")]
fn chart_window(cfg: &Config, force: bool) -> bool {
    tranche_trader::backtesting::chart::chart_due(force, cfg.report_timezone, Utc::now())
}

#[cfg(not(feature = "charts"))]
fn chart_window(_cfg: &Config, _force: bool) -> bool {
    false
}

fn finish(cfg: &Config, trading: &TradingArgs, summary: &RunSummary, historical: bool, draw: bool) {
    let end = if historical {
        summary.state.last_operation_time.max(summary.start_time)
    } else {
        Utc::now()
    };
    let report = SimulationReport::from_state(
        &summary.state,
        &trading.to_params(),
        summary.start_time,
        end,
        historical,
    );
    report.print_summary();
    match report.save(&cfg.outputs_dir) {
        Ok(path) => info!("Report saved to {}", path.display()),
        Err(e) => warn!("Failed to save report: {}", e),
    }

    if draw {
        draw_chart(cfg, summary);
    }
}

#[cfg(feature = "charts")]
fn draw_chart(cfg: &Config, summary: &RunSummary) {
    use tranche_trader::backtesting::chart::create_chart;

    match create_chart(&summary.state, summary.market.as_ref(), &cfg.outputs_dir) {
        Ok(path) => info!("Chart saved to {}", path.display()),
        Err(e) => warn!("Failed to draw chart: {}", e),
    }
}

#[cfg(not(feature = "charts"))]
fn draw_chart(_cfg: &Config, _summary: &RunSummary) {
    warn!("Built without the `charts` feature; skipping chart");
}
