use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::TradingParams;
use crate::exchange::Exchange;
use crate::models::{ExitReason, MarketData, Tranche};
use crate::trading::account::{AccountState, Marker};
use crate::trading::price_source::{PriceSource, PriceTick};

/// Tax on operation profit once gross sale proceeds pass the exemption limit.
pub const TAX_RATE: f64 = 0.15;
pub const TAX_EXEMPTION_LIMIT: f64 = 35_000.0;

/// Summary of one operation, folded into the account by
/// [`AccountState::record_outcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub operation: u32,
    pub profit: f64,
    pub tax: f64,
    pub fees: f64,
    pub avg_buy_price: f64,
    pub avg_sell_price: f64,
    /// First fill relative to the price seen before the operation.
    pub buy_variation: f64,
    pub sell_variation: f64,
    pub exit_reason: ExitReason,
    pub traded: bool,
    pub quantity: f64,
    pub cost: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub last_price: f64,
}

/// Thresholds in force for one operation, after escalation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLimits {
    pub stop_loss: f64,
    pub profit_target: f64,
    pub max_duration: u32,
}

/// Per-operation accumulator.
#[derive(Debug, Clone, Default)]
struct OperationTally {
    fees: f64,
    profit: f64,
    proceeds: f64,
    sold_quantity: f64,
    sell_variation: f64,
    traded: bool,
    first_tick: Option<PriceTick>,
    last_tick: Option<PriceTick>,
}

impl OperationTally {
    fn observe(&mut self, tick: PriceTick) {
        self.first_tick.get_or_insert(tick);
        self.last_tick = Some(tick);
    }
}

pub struct TradingEngine {
    params: TradingParams,
    exchange: Box<dyn Exchange>,
}

impl TradingEngine {
    pub fn new(params: TradingParams, exchange: Box<dyn Exchange>) -> Self {
        Self { params, exchange }
    }

    pub fn params(&self) -> &TradingParams {
        &self.params
    }

    pub fn exchange_name(&self) -> &'static str {
        self.exchange.name()
    }

    /// Run operations from `state.current_operation` up to the configured
    /// count, saving a snapshot to `state_file` after each one. Stops early
    /// when a replayed series runs out.
    pub async fn run_operations(
        &mut self,
        market: Option<&MarketData>,
        state: &mut AccountState,
        state_file: Option<&Path>,
    ) -> Result<()> {
        let mut source = PriceSource::new(market, state.current_operation_time);

        while state.current_operation <= self.params.operations {
            let op = state.current_operation;
            let outcome = self.run_single_operation(op, &mut source, state).await?;
            state.record_outcome(&outcome);

            state.current_operation_time = source
                .peek_timestamp(state)
                .unwrap_or(outcome.end_time + Duration::hours(1));

            info!(
                "Operation {} finished - reason: {}, profit: R${:.2}, cash: R${:.2}",
                op, outcome.exit_reason, outcome.profit, state.cash
            );

            if let Some(path) = state_file {
                if let Err(e) = state.save(path) {
                    warn!("Failed to persist state to {}: {}", path.display(), e);
                }
            }

            if source.is_exhausted(state) {
                info!("End of historical data reached, stopping simulation");
                break;
            }
        }

        Ok(())
    }

    /// Run one buy, monitor and exit cycle.
    pub async fn run_single_operation(
        &mut self,
        op: u32,
        source: &mut PriceSource<'_>,
        state: &mut AccountState,
    ) -> Result<OperationOutcome> {
        let start_time = state.current_operation_time;
        let previous_price = state.last_price;
        source.set_clock(start_time);

        if state.cooldown_remaining > 0 {
            info!(
                "In cooldown after stop-loss, skipping operation {} ({} remaining)",
                op, state.cooldown_remaining
            );
            state.cooldown_remaining -= 1;
            source.skip(state);
            return Ok(OperationOutcome {
                operation: op,
                profit: 0.0,
                tax: 0.0,
                fees: 0.0,
                avg_buy_price: previous_price,
                avg_sell_price: previous_price,
                buy_variation: 0.0,
                sell_variation: 0.0,
                exit_reason: ExitReason::Cooldown,
                traded: false,
                quantity: 0.0,
                cost: 0.0,
                start_time,
                end_time: start_time,
                last_price: previous_price,
            });
        }

        let limits = self.escalate(state);
        let mut tally = OperationTally::default();

        let base_price = if state.has_open_position() {
            info!(
                "Operation {} - resuming {} open tranche(s)",
                op,
                state.open_tranches.len()
            );
            None
        } else {
            self.scale_in(op, source, state, &mut tally).await?
        };

        let entry_quantity = state.open_quantity();
        let entry_cost = state.open_cost();
        let first_fill = state.open_tranches.first().map(|t| t.price);
        let avg_buy_price = if entry_quantity > 0.0 {
            entry_cost / entry_quantity
        } else {
            base_price.unwrap_or(previous_price)
        };
        let reference_buy = first_fill.or(base_price).unwrap_or(previous_price);
        let buy_variation = if previous_price > 0.0 {
            (reference_buy - previous_price) / previous_price
        } else {
            0.0
        };

        let exit_reason = if state.has_open_position() {
            self.monitor(source, state, limits, avg_buy_price, &mut tally)
                .await?
        } else {
            warn!(
                "Operation {} - no tranche bought: dip levels not reached within {} steps",
                op, self.params.max_steps_in
            );
            ExitReason::NoPurchase
        };

        if exit_reason == ExitReason::StopLoss {
            state.cooldown_remaining = self.params.cooldown_steps;
        }

        let tax = if tally.proceeds > TAX_EXEMPTION_LIMIT && tally.profit > 0.0 {
            tally.profit * TAX_RATE
        } else {
            0.0
        };

        let last_price = tally
            .last_tick
            .map(|t| t.price)
            .unwrap_or(previous_price);
        let end_time = tally.last_tick.map(|t| t.timestamp).unwrap_or(start_time);
        let avg_sell_price = if tally.sold_quantity > 0.0 {
            tally.proceeds / tally.sold_quantity
        } else {
            last_price
        };

        Ok(OperationOutcome {
            operation: op,
            profit: tally.profit,
            tax,
            fees: tally.fees,
            avg_buy_price,
            avg_sell_price,
            buy_variation,
            sell_variation: tally.sell_variation,
            exit_reason,
            traded: tally.traded,
            quantity: entry_quantity,
            cost: entry_cost,
            start_time: tally.first_tick.map(|t| t.timestamp).unwrap_or(start_time),
            end_time,
            last_price,
        })
    }

    /// Decide this operation's thresholds. After a full stop-loss the bet is
    /// doubled, up to `max_escalations` times in a row.
    pub fn escalate(&self, state: &mut AccountState) -> RiskLimits {
        let double = state.last_exit_reason == Some(ExitReason::StopLoss)
            && state.consecutive_losses < self.params.max_escalations;

        if double {
            state.consecutive_losses += 1;
            info!(
                "Doubling the bet (consecutive loss #{})",
                state.consecutive_losses
            );
            RiskLimits {
                stop_loss: self.params.stop_loss * 2.0,
                profit_target: self.params.profit_target * 2.0,
                max_duration: self.params.max_duration_hours * 2,
            }
        } else {
            state.consecutive_losses = 0;
            RiskLimits {
                stop_loss: self.params.stop_loss,
                profit_target: self.params.profit_target,
                max_duration: self.params.max_duration_hours,
            }
        }
    }

    /// Buy the dip ladder. Returns the reference price drawdowns were
    /// measured from, or `None` if no price was observed.
    async fn scale_in(
        &mut self,
        op: u32,
        source: &mut PriceSource<'_>,
        state: &mut AccountState,
        tally: &mut OperationTally,
    ) -> Result<Option<f64>> {
        let levels = self.params.tranches_buy.len();
        let mut filled = vec![false; levels];
        let mut filled_count = 0;
        let cash_at_start = state.cash;
        let mut base_price: Option<f64> = None;
        let mut idle_steps = 0;
        let mut steps_since_fill = u32::MAX;

        info!(
            "Starting operation {} - trying to buy {} tranches on dips",
            op, levels
        );

        while filled_count < levels && idle_steps < self.params.max_steps_in {
            let Some(tick) = source.next(self.exchange.as_mut(), state).await? else {
                break;
            };
            tally.observe(tick);

            let base = *base_price.get_or_insert(tick.price);
            let drawdown = if base > 0.0 {
                (tick.price - base) / base
            } else {
                0.0
            };
            steps_since_fill = steps_since_fill.saturating_add(1);

            let candidate = (0..levels)
                .find(|&i| !filled[i] && drawdown <= self.params.levels_buy[i])
                .filter(|_| steps_since_fill >= self.params.min_steps_between_tranches);

            let Some(i) = candidate else {
                debug!(
                    "Step {}: price R${:.2}, drawdown {:.2}%",
                    idle_steps,
                    tick.price,
                    drawdown * 100.0
                );
                idle_steps += 1;
                continue;
            };

            let allocation_base = if self.params.fixed_tranche_allocation {
                cash_at_start
            } else {
                state.cash
            };
            let notional = allocation_base * self.params.tranches_buy[i];
            let fill = self
                .exchange
                .buy(notional, tick.price, tick.timestamp)
                .await?;

            filled[i] = true;
            filled_count += 1;
            steps_since_fill = 0;

            if fill.is_empty() {
                warn!(
                    "Tranche {}/{} skipped: nothing to spend (R${:.2})",
                    i + 1,
                    levels,
                    notional
                );
                continue;
            }

            state.cash -= notional + fill.fee;
            state.open_tranches.push(Tranche {
                quantity: fill.quantity,
                price: tick.price,
                index: i,
                fee: fill.fee,
            });
            state.buy_points.push(Marker {
                index: state.cursor.saturating_sub(1),
                price: tick.price,
            });
            tally.fees += fill.fee;
            tally.traded = true;

            info!(
                "Tranche {}/{} bought: {:.5} BTC at R${:.2} (dip {:.2}%), allocated R${:.2} of R${:.2}",
                i + 1,
                levels,
                fill.quantity,
                tick.price,
                drawdown * 100.0,
                notional,
                allocation_base
            );
        }

        let bought = state.open_tranches.len();
        if bought > 0 && bought < levels {
            warn!(
                "Operation {} - only {}/{} tranches bought",
                op, bought, levels
            );
        } else if bought == levels {
            info!(
                "Operation {} - scale-in complete: {:.5} BTC, cost R${:.2}",
                op,
                state.open_quantity(),
                state.open_cost()
            );
        }

        Ok(base_price)
    }

    /// Watch the open position hour by hour until an exit fires, the
    /// duration budget runs out, or the price stream ends.
    async fn monitor(
        &mut self,
        source: &mut PriceSource<'_>,
        state: &mut AccountState,
        limits: RiskLimits,
        avg_buy_price: f64,
        tally: &mut OperationTally,
    ) -> Result<ExitReason> {
        let stop_loss_window = limits
            .max_duration
            .saturating_sub(self.params.min_stop_loss_hours);
        let early_exit_after = limits.max_duration as f64 * self.params.early_exit_time_fraction;
        let mut elapsed: u32 = 0;

        while elapsed < limits.max_duration {
            let Some(tick) = source.next(self.exchange.as_mut(), state).await? else {
                tally.sell_variation = position_variation(state, state.last_price);
                warn!(
                    "Price data exhausted with {} tranche(s) still open",
                    state.open_tranches.len()
                );
                return Ok(ExitReason::DataExhausted);
            };
            tally.observe(tick);
            elapsed += 1;

            let variation = position_variation(state, tick.price);

            if variation <= limits.stop_loss && elapsed >= stop_loss_window {
                tally.sell_variation = variation;
                self.liquidate(state, tick, ExitReason::StopLoss, tally).await?;
                return Ok(ExitReason::StopLoss);
            }

            if variation >= limits.profit_target {
                tally.sell_variation = variation;
                self.liquidate(state, tick, ExitReason::ProfitTarget, tally)
                    .await?;
                return Ok(ExitReason::ProfitTarget);
            }

            self.scale_out(state, tick, tally).await?;
            if !state.has_open_position() {
                tally.sell_variation = if avg_buy_price > 0.0 {
                    (tick.price - avg_buy_price) / avg_buy_price
                } else {
                    0.0
                };
                info!(
                    "SCALING OUT COMPLETE - {} - total profit R${:.2} ({:.2}%), avg buy R${:.2}, last sale R${:.2}",
                    tick.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    tally.profit,
                    tally.sell_variation * 100.0,
                    avg_buy_price,
                    tick.price
                );
                return Ok(ExitReason::ScaledOut);
            }

            let variation = position_variation(state, tick.price);
            if elapsed as f64 >= early_exit_after && variation >= self.params.min_early_profit {
                tally.sell_variation = variation;
                self.liquidate(state, tick, ExitReason::EarlyExit, tally).await?;
                return Ok(ExitReason::EarlyExit);
            }

            debug!(
                "Hour {}/{}: price R${:.2}, position {:.2}%",
                elapsed,
                limits.max_duration,
                tick.price,
                variation * 100.0
            );
        }

        let tick = tally.last_tick.unwrap_or(PriceTick {
            price: state.last_price,
            timestamp: state.current_operation_time,
        });
        tally.sell_variation = position_variation(state, tick.price);
        info!(
            "Maximum duration of {}h reached, forcing sale",
            limits.max_duration
        );
        self.liquidate(state, tick, ExitReason::TimeLimit, tally).await?;
        Ok(ExitReason::TimeLimit)
    }

    /// Sell every open tranche in one order.
    async fn liquidate(
        &mut self,
        state: &mut AccountState,
        tick: PriceTick,
        reason: ExitReason,
        tally: &mut OperationTally,
    ) -> Result<()> {
        let quantity = state.open_quantity();
        let invested = state.open_invested();
        let fill = self
            .exchange
            .sell(quantity, tick.price, tick.timestamp, reason.as_str())
            .await?;

        let profit = fill.net() - invested;
        state.cash += fill.net();
        state.open_tranches.clear();
        state.sell_points.push(Marker {
            index: state.cursor.saturating_sub(1),
            price: tick.price,
        });

        tally.fees += fill.fee;
        tally.profit += profit;
        tally.proceeds += fill.proceeds;
        tally.sold_quantity += quantity;
        tally.traded = true;

        info!(
            "SALE [{}] - {} - profit R${:.2} ({:.2}%), price R${:.2}, {:.5} BTC, proceeds R${:.2}",
            reason,
            tick.timestamp.format("%Y-%m-%d %H:%M:%S"),
            profit,
            tally.sell_variation * 100.0,
            tick.price,
            quantity,
            fill.proceeds
        );
        Ok(())
    }

    /// Sell each tranche, lowest ladder index first, whose own gain reached
    /// any configured sell level.
    async fn scale_out(
        &mut self,
        state: &mut AccountState,
        tick: PriceTick,
        tally: &mut OperationTally,
    ) -> Result<()> {
        let Some(min_level) = self
            .params
            .levels_sell
            .iter()
            .copied()
            .reduce(f64::min)
        else {
            return Ok(());
        };

        let mut order: Vec<usize> = (0..state.open_tranches.len()).collect();
        order.sort_by_key(|&i| state.open_tranches[i].index);

        let mut sold = vec![false; state.open_tranches.len()];
        for i in order {
            let tranche = state.open_tranches[i].clone();
            let gain = tranche.variation(tick.price);
            if gain < min_level {
                continue;
            }

            let fill = self
                .exchange
                .sell(tranche.quantity, tick.price, tick.timestamp, "Scaling Out")
                .await?;
            let profit = fill.net() - tranche.invested();

            state.cash += fill.net();
            state.sell_points.push(Marker {
                index: state.cursor.saturating_sub(1),
                price: tick.price,
            });
            tally.fees += fill.fee;
            tally.profit += profit;
            tally.proceeds += fill.proceeds;
            tally.sold_quantity += tranche.quantity;
            tally.traded = true;
            sold[i] = true;

            info!(
                "TRANCHE {} SOLD - {} - partial profit R${:.2} ({:.2}%), bought R${:.2}, sold R${:.2}, {:.5} BTC",
                tranche.index + 1,
                tick.timestamp.format("%Y-%m-%d %H:%M:%S"),
                profit,
                gain * 100.0,
                tranche.price,
                tick.price,
                tranche.quantity
            );
        }

        let mut flags = sold.into_iter();
        state
            .open_tranches
            .retain(|_| !flags.next().unwrap_or(false));
        Ok(())
    }
}

/// Mark-to-market return of the open position at `price`, against its
/// acquisition cost.
pub fn position_variation(state: &AccountState, price: f64) -> f64 {
    let cost = state.open_cost();
    if cost <= 0.0 {
        return 0.0;
    }
    (price * state.open_quantity() - cost) / cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{engine_with, hourly_market, single_tranche_params, t0};

    #[tokio::test]
    async fn escalation_doubles_after_stop_loss() {
        let params = TradingParams::default();
        let engine = engine_with(params.clone());
        let mut state = AccountState::new(1000.0, t0());
        state.last_exit_reason = Some(ExitReason::StopLoss);

        let limits = engine.escalate(&mut state);
        assert_eq!(limits.stop_loss, params.stop_loss * 2.0);
        assert_eq!(limits.profit_target, params.profit_target * 2.0);
        assert_eq!(limits.max_duration, params.max_duration_hours * 2);
        assert_eq!(state.consecutive_losses, 1);
    }

    #[tokio::test]
    async fn escalation_caps_and_resets() {
        let params = TradingParams {
            max_escalations: 2,
            ..TradingParams::default()
        };
        let engine = engine_with(params.clone());
        let mut state = AccountState::new(1000.0, t0());
        state.last_exit_reason = Some(ExitReason::StopLoss);
        state.consecutive_losses = 2;

        let limits = engine.escalate(&mut state);
        assert_eq!(limits.stop_loss, params.stop_loss);
        assert_eq!(state.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn fills_one_tranche_per_step_in_index_order() {
        let params = TradingParams {
            operations: 1,
            fee_rate: 0.0,
            max_steps_in: 5,
            max_duration_hours: 1,
            ..TradingParams::default()
        };
        // A single crash crosses every level at once.
        let market = hourly_market(&[100.0, 90.0, 90.0, 90.0, 90.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();

        assert_eq!(state.buy_points.len(), 3);
        assert_eq!(
            state.buy_points.iter().map(|m| m.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(outcome.exit_reason, ExitReason::TimeLimit);
        assert!(state.open_tranches.is_empty());
        assert!((state.cash - 1000.0).abs() < 1e-9);
    }

    async fn scale_in_with_allocation(fixed: bool) -> AccountState {
        let params = TradingParams {
            fee_rate: 0.0,
            tranches_buy: vec![0.5, 0.5],
            levels_buy: vec![0.0, 0.0],
            fixed_tranche_allocation: fixed,
            ..single_tranche_params()
        };
        // Two fills, then the series ends with the position open.
        let market = hourly_market(&[100.0, 100.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::DataExhausted);
        state
    }

    #[tokio::test]
    async fn fixed_allocation_uses_starting_cash() {
        let state = scale_in_with_allocation(true).await;
        assert_eq!(state.open_tranches.len(), 2);
        assert!((state.open_tranches[1].quantity - 5.0).abs() < 1e-12);
        assert!(state.cash.abs() < 1e-9);
    }

    #[tokio::test]
    async fn floating_allocation_uses_current_cash() {
        let state = scale_in_with_allocation(false).await;
        assert!((state.open_tranches[1].quantity - 2.5).abs() < 1e-12);
        assert!((state.cash - 250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_dip_means_no_purchase() {
        let params = TradingParams {
            max_steps_in: 3,
            ..TradingParams::default()
        };
        let market = hourly_market(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::NoPurchase);
        assert!(!outcome.traded);
        assert_eq!(state.cursor, 3);
        assert_eq!(state.cash, 1000.0);
    }

    #[tokio::test]
    async fn profit_target_liquidates_everything() {
        let params = TradingParams {
            profit_target: 0.05,
            ..single_tranche_params()
        };
        let market = hourly_market(&[100.0, 106.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::ProfitTarget);
        assert!((outcome.profit - 60.0).abs() < 1e-9);
        assert!((state.cash - 1060.0).abs() < 1e-9);
        assert_eq!(state.sell_points.len(), 1);
    }

    #[tokio::test]
    async fn scale_out_sells_tranches_separately() {
        let params = TradingParams {
            operations: 1,
            fee_rate: 0.0,
            profit_target: 1.0,
            tranches_buy: vec![0.5, 0.5],
            levels_buy: vec![0.0, -0.1],
            tranches_sell: vec![0.5, 0.5],
            levels_sell: vec![0.05, 0.5],
            max_duration_hours: 10,
            early_exit_time_fraction: 1.0,
            ..TradingParams::default()
        };
        // Buy at 100 and 89; 95 lifts only the second tranche past 5%,
        // 106 lifts the first.
        let market = hourly_market(&[100.0, 89.0, 95.0, 106.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::ScaledOut);
        assert_eq!(state.sell_points.len(), 2);
        assert_eq!(state.sell_points[0].price, 95.0);
        let expected = (500.0 / 89.0) * 6.0 + 5.0 * 6.0;
        assert!((outcome.profit - expected).abs() < 1e-9);
        assert!((state.cash - (1000.0 + expected)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn early_exit_after_time_fraction() {
        let params = TradingParams {
            profit_target: 0.5,
            levels_sell: vec![0.5],
            min_early_profit: 0.03,
            early_exit_time_fraction: 0.5,
            max_duration_hours: 4,
            ..single_tranche_params()
        };
        // +4% at hour 1 is too early; still +4% at hour 2 qualifies.
        let market = hourly_market(&[100.0, 104.0, 104.0, 104.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::EarlyExit);
        assert_eq!(outcome.end_time, t0() + Duration::hours(2));
    }

    #[tokio::test]
    async fn stop_loss_waits_for_window() {
        let params = TradingParams {
            stop_loss: -0.05,
            max_duration_hours: 4,
            min_stop_loss_hours: 2,
            ..single_tranche_params()
        };
        // Loss is deep from hour 1 but the stop only arms at hour 2.
        let market = hourly_market(&[100.0, 80.0, 80.0, 80.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::StopLoss);
        assert_eq!(outcome.end_time, t0() + Duration::hours(2));
        assert_eq!(state.cooldown_remaining, 5);
    }

    #[tokio::test]
    async fn tax_applies_above_exemption() {
        let params = TradingParams {
            profit_target: 0.05,
            ..single_tranche_params()
        };
        let market = hourly_market(&[100.0, 110.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(100_000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert!((outcome.profit - 10_000.0).abs() < 1e-6);
        assert!((outcome.tax - 1_500.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn time_limit_forces_sale_at_last_price() {
        let params = TradingParams {
            max_duration_hours: 2,
            ..single_tranche_params()
        };
        let market = hourly_market(&[100.0, 100.5, 99.5, 120.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(1000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::TimeLimit);
        assert_eq!(outcome.avg_sell_price, 99.5);
        assert!(state.open_tranches.is_empty());
        assert_eq!(state.cursor, 3);
    }

    #[tokio::test]
    async fn buy_debits_notional_plus_fee() {
        let params = TradingParams {
            fee_rate: 0.01,
            ..single_tranche_params()
        };
        // The series ends right after the fill, leaving the tranche open.
        let market = hourly_market(&[100_000.0]);
        let mut engine = engine_with(params);
        let mut state = AccountState::new(10_000.0, t0());
        let mut source = PriceSource::new(Some(&market), t0());

        let outcome = engine
            .run_single_operation(1, &mut source, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::DataExhausted);

        let tranche = &state.open_tranches[0];
        assert!((tranche.fee - 100.0).abs() < 1e-9);
        assert!((tranche.quantity - 0.099).abs() < 1e-12);
        assert!((state.cash + 100.0).abs() < 1e-9);
        assert!((state.open_invested() - 10_100.0).abs() < 1e-9);
    }
}
