//! Two-panel PNG of a run: price with trade markers on top, balance after
//! each traded operation below.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::ChartError;
use crate::models::MarketData;
use crate::trading::AccountState;

pub const CHART_FILE: &str = "simulacao_horaria.png";

const WIDTH: u32 = 1500;
const HEIGHT: u32 = 1000;
const LABEL_SIZE: i32 = 16;
const ORANGE: RGBColor = RGBColor(255, 140, 0);

fn plot_err<E: std::fmt::Display>(e: E) -> ChartError {
    ChartError::Plotters(e.to_string())
}

/// In live mode the chart is redrawn once a day, during local midnight.
pub fn chart_due(force: bool, tz: Tz, now: DateTime<Utc>) -> bool {
    force || now.with_timezone(&tz).hour() == 0
}

/// Render the run chart into `outputs_dir` and return its path.
pub fn create_chart(
    state: &AccountState,
    market: Option<&MarketData>,
    outputs_dir: &Path,
) -> Result<PathBuf, ChartError> {
    std::fs::create_dir_all(outputs_dir)?;
    let path = outputs_dir.join(CHART_FILE);

    {
        let root = BitMapBackend::new(&path, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        let (upper, lower) = root.split_vertically(HEIGHT * 3 / 5);

        match market.filter(|m| !m.is_empty()) {
            Some(market) => draw_history(&upper, state, market)?,
            None => draw_synthetic(&upper, state)?,
        }
        draw_balance(&lower, state)?;

        root.present().map_err(plot_err)?;
    }
    Ok(path)
}

fn padded(lo: f64, hi: f64) -> std::ops::Range<f64> {
    let pad = ((hi - lo) * 0.05).max(hi.abs() * 0.001).max(1.0);
    (lo - pad)..(hi + pad)
}

fn draw_history<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    state: &AccountState,
    market: &MarketData,
) -> Result<(), ChartError> {
    let prices = market.prices();
    let mut chart = ChartBuilder::on(area)
        .caption("Bot simulation on historical data", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(90)
        .build_cartesian_2d(0usize..prices.len(), padded(market.price_min(), market.price_max()))
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .y_desc("BTC price (R$)")
        .label_style(("sans-serif", LABEL_SIZE))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            prices.iter().enumerate().map(|(i, p)| (i, *p)),
            &BLUE,
        ))
        .map_err(plot_err)?
        .label("Historical BTC price (R$)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(
            state
                .buy_points
                .iter()
                .map(|m| TriangleMarker::new((m.index, m.price), 8, GREEN.filled())),
        )
        .map_err(plot_err)?
        .label("Buys")
        .legend(|(x, y)| TriangleMarker::new((x + 10, y), 6, GREEN.filled()));

    chart
        .draw_series(
            state
                .sell_points
                .iter()
                .map(|m| Circle::new((m.index, m.price), 5, RED.filled())),
        )
        .map_err(plot_err)?
        .label("Sells")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, RED.filled()));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)
}

fn draw_synthetic<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    state: &AccountState,
) -> Result<(), ChartError> {
    let prices = &state.sell_prices;
    let lo = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = if prices.is_empty() { padded(0.0, 1.0) } else { padded(lo, hi) };

    let mut chart = ChartBuilder::on(area)
        .caption("Bot simulation (synthetic prices)", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(90)
        .build_cartesian_2d(0usize..prices.len() + 1, range)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Operation")
        .y_desc("BTC price (R$)")
        .label_style(("sans-serif", LABEL_SIZE))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            prices.iter().enumerate().map(|(i, p)| (i + 1, *p)),
            &GREEN,
        ))
        .map_err(plot_err)?;
    chart
        .draw_series(
            prices
                .iter()
                .enumerate()
                .map(|(i, p)| Circle::new((i + 1, *p), 4, GREEN.filled())),
        )
        .map_err(plot_err)?;
    Ok(())
}

fn draw_balance<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    state: &AccountState,
) -> Result<(), ChartError> {
    let balances = &state.balance_history;
    if balances.is_empty() {
        let (w, h) = area.dim_in_pixel();
        area.draw(&Text::new(
            "No operations executed",
            (w as i32 / 2 - 120, h as i32 / 2),
            ("sans-serif", 24),
        ))
        .map_err(plot_err)?;
        return Ok(());
    }

    let lo = balances.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = balances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = padded(lo, hi);
    let floor = range.start;

    let mut chart = ChartBuilder::on(area)
        .caption("Balance per executed operation", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(90)
        .build_cartesian_2d(0usize..balances.len() + 1, range)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Executed operations")
        .y_desc("Balance (R$)")
        .label_style(("sans-serif", LABEL_SIZE))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(AreaSeries::new(
            balances.iter().enumerate().map(|(i, b)| (i + 1, *b)),
            floor,
            ORANGE.mix(0.3),
        ))
        .map_err(plot_err)?;
    chart
        .draw_series(LineSeries::new(
            balances.iter().enumerate().map(|(i, b)| (i + 1, *b)),
            ORANGE.stroke_width(2),
        ))
        .map_err(plot_err)?
        .label("Balance (R$)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ORANGE));
    chart
        .draw_series(
            balances
                .iter()
                .enumerate()
                .map(|(i, b)| Circle::new((i + 1, *b), 3, ORANGE.filled())),
        )
        .map_err(plot_err)?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)
}
