use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::TradingParams;
use crate::models::ExitReason;
use crate::trading::{AccountState, OperationRecord};

pub const REPORT_FILE: &str = "relatorio_final.txt";

/// End-of-run summary built from the account ledger.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub params: TradingParams,
    pub historical: bool,

    // Period
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub hours: f64,

    // Financials
    pub initial_capital: f64,
    pub final_cash: f64,
    pub open_quantity: f64,
    pub final_equity: f64,
    pub net_result: f64,
    pub total_profit: f64,
    pub sum_of_profits: f64,
    pub total_tax: f64,
    pub total_fees: f64,
    pub return_pct: f64,

    // Statistics
    pub operations_run: usize,
    pub operations_traded: usize,
    pub winning: usize,
    pub losing: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub best: f64,
    pub worst: f64,
    pub buy_points: usize,
    pub sell_points: usize,
    pub exits: Vec<(ExitReason, usize)>,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    pub details: Vec<OperationRecord>,
}

impl SimulationReport {
    pub fn from_state(
        state: &AccountState,
        params: &TradingParams,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        historical: bool,
    ) -> Self {
        let initial = params.initial_capital;
        let final_equity = state.equity(state.last_price);
        let net_result = final_equity - initial;

        let profits = &state.profits;
        let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();
        let decided = wins.len() + losses.len();

        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut exits: Vec<(ExitReason, usize)> = Vec::new();
        for op in &state.operations {
            match exits.iter_mut().find(|(r, _)| *r == op.exit_reason) {
                Some((_, n)) => *n += 1,
                None => exits.push((op.exit_reason, 1)),
            }
        }

        let (max_drawdown, max_drawdown_pct) = max_drawdown(initial, &state.balance_history);

        SimulationReport {
            params: params.clone(),
            historical,
            start,
            end,
            hours: (end - start).num_minutes() as f64 / 60.0,
            initial_capital: initial,
            final_cash: state.cash,
            open_quantity: state.open_quantity(),
            final_equity,
            net_result,
            total_profit: state.total_profit,
            sum_of_profits: profits.iter().sum(),
            total_tax: state.total_tax,
            total_fees: state.total_fees,
            return_pct: if initial > 0.0 {
                net_result / initial * 100.0
            } else {
                0.0
            },
            operations_run: profits.len(),
            operations_traded: state.operations.len(),
            winning: wins.len(),
            losing: losses.len(),
            win_rate: if decided > 0 {
                wins.len() as f64 / decided as f64 * 100.0
            } else {
                0.0
            },
            profit_factor,
            best: profits.iter().copied().fold(0.0, f64::max),
            worst: profits.iter().copied().fold(0.0, f64::min),
            buy_points: state.buy_points.len(),
            sell_points: state.sell_points.len(),
            exits,
            max_drawdown,
            max_drawdown_pct,
            details: state.operations.clone(),
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn print_summary(&self) {
        println!("\n{}", self);
    }

    /// Write the rendered report into `outputs_dir`.
    pub fn save(&self, outputs_dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(outputs_dir)?;
        let path = outputs_dir.join(REPORT_FILE);
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.params;
        let rule = "─".repeat(35);

        writeln!(f, "{}", "=".repeat(70))?;
        writeln!(f, "  SIMULATION REPORT")?;
        writeln!(f, "{}", "=".repeat(70))?;

        writeln!(f, "  CONFIGURATION")?;
        writeln!(f, "  {}", rule)?;
        writeln!(f, "  Initial capital:  R${:.2}", self.initial_capital)?;
        writeln!(f, "  Operations:       {}", p.operations)?;
        writeln!(f, "  Profit target:    {:.1}%", p.profit_target * 100.0)?;
        writeln!(f, "  Stop-loss:        {:.1}%", p.stop_loss * 100.0)?;
        writeln!(f, "  Fee rate:         {:.2}%", p.fee_rate * 100.0)?;
        writeln!(
            f,
            "  Historical data:  {}",
            if self.historical { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "  Buy tranches:     {} (levels: {})",
            join(&p.tranches_buy),
            join(&p.levels_buy)
        )?;
        writeln!(
            f,
            "  Sell tranches:    {} (levels: {})",
            join(&p.tranches_sell),
            join(&p.levels_sell)
        )?;
        writeln!(f)?;

        writeln!(f, "  FINANCIAL RESULTS")?;
        writeln!(f, "  {}", rule)?;
        writeln!(f, "  Final cash:       R${:.2}", self.final_cash)?;
        writeln!(f, "  Open BTC:         {:.5} BTC", self.open_quantity)?;
        writeln!(f, "  Final equity:     R${:.2}", self.final_equity)?;
        writeln!(
            f,
            "  Net result:       R${:+.2} ({:+.2}%)",
            self.net_result, self.return_pct
        )?;
        writeln!(f, "  Realized profit:  R${:+.2}", self.total_profit)?;
        writeln!(f, "  Sum of profits:   R${:+.2}", self.sum_of_profits)?;
        writeln!(f, "  Tax due:          R${:.2}", self.total_tax)?;
        writeln!(f, "  Fees paid:        R${:.2}", self.total_fees)?;
        writeln!(f)?;

        writeln!(f, "  STATISTICS")?;
        writeln!(f, "  {}", rule)?;
        writeln!(f, "  Operations run:   {}", self.operations_run)?;
        writeln!(f, "  With trades:      {}", self.operations_traded)?;
        writeln!(f, "  Win/Loss:         {} / {}", self.winning, self.losing)?;
        writeln!(f, "  Win rate:         {:.1}%", self.win_rate)?;
        writeln!(f, "  Profit factor:    {:.2}", self.profit_factor)?;
        writeln!(f, "  Best:             R${:+.2}", self.best)?;
        writeln!(f, "  Worst:            R${:+.2}", self.worst)?;
        writeln!(f, "  Buy points:       {}", self.buy_points)?;
        writeln!(f, "  Sell points:      {}", self.sell_points)?;
        for (reason, n) in &self.exits {
            writeln!(f, "    {:<30} {}", reason, n)?;
        }
        writeln!(f)?;

        writeln!(f, "  PERIOD")?;
        writeln!(f, "  {}", rule)?;
        writeln!(f, "  Start:            {}", self.start.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "  End:              {}", self.end.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "  Duration:         {:.1} hours", self.hours)?;
        writeln!(f)?;

        writeln!(f, "  RISK MANAGEMENT")?;
        writeln!(f, "  {}", rule)?;
        writeln!(f, "  Max escalations:  {}", p.max_escalations)?;
        writeln!(f, "  Cooldown:         {} operations", p.cooldown_steps)?;
        writeln!(f, "  USD/BRL rate:     {}", p.fx_rate)?;
        writeln!(
            f,
            "  Max DD:           R${:.2} ({:.1}%)",
            self.max_drawdown, self.max_drawdown_pct
        )?;

        if !self.details.is_empty() {
            writeln!(f)?;
            writeln!(f, "  OPERATION DETAILS")?;
            writeln!(f, "  {}", rule)?;
            for d in &self.details {
                writeln!(f, "  #{} {}", d.operation_id, d.exit_reason)?;
                writeln!(
                    f,
                    "    profit R${:+.2} | tax R${:.2} | fees R${:.2}",
                    d.profit, d.tax, d.fees
                )?;
                writeln!(
                    f,
                    "    avg buy R${:.2} | avg sell R${:.2}",
                    d.buy_price, d.sell_price
                )?;
                writeln!(
                    f,
                    "    {:.5} BTC | cost R${:.2}",
                    d.quantity, d.cost
                )?;
                writeln!(
                    f,
                    "    {} to {}",
                    d.start_time.format("%Y-%m-%d %H:%M:%S"),
                    d.end_time.format("%Y-%m-%d %H:%M:%S")
                )?;
            }
        }

        writeln!(f, "{}", "=".repeat(70))
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Largest peak-to-trough drop of the balance curve, seeded with the
/// starting capital. Returns the absolute drop and its percent of the peak.
fn max_drawdown(initial: f64, balances: &[f64]) -> (f64, f64) {
    let mut peak = initial;
    let mut worst = 0.0;
    let mut worst_pct = 0.0;
    for &b in balances {
        peak = peak.max(b);
        let dd = peak - b;
        if dd > worst {
            worst = dd;
            worst_pct = if peak > 0.0 { dd / peak * 100.0 } else { 0.0 };
        }
    }
    (worst, worst_pct)
}
