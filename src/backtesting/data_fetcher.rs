use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DataError;
use crate::models::{MarketData, PricePoint};

const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";
const PRICE_COLUMNS: [&str; 2] = ["Price_USD", "Close"];
const TIME_COLUMNS: [&str; 2] = ["Datetime", "Timestamp_ms"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Window to download: either the last `days` days or an explicit date pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRange {
    pub days: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Default for FetchRange {
    fn default() -> Self {
        Self {
            days: 30,
            start_date: None,
            end_date: None,
        }
    }
}

impl FetchRange {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), DataError> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => {
                if start >= end {
                    return Err(DataError::InvalidRange(format!(
                        "start {} must be before end {}",
                        start, end
                    )));
                }
                Ok((
                    start.and_time(chrono::NaiveTime::MIN).and_utc(),
                    end.and_time(chrono::NaiveTime::MIN).and_utc(),
                ))
            }
            (None, None) => Ok((now - Duration::days(self.days as i64), now)),
            _ => Err(DataError::InvalidRange(
                "--start-date and --end-date must be given together".to_string(),
            )),
        }
    }

    pub fn file_name(&self) -> String {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => format!(
                "bitcoin_data_{}_to_{}.csv",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ),
            _ => format!("bitcoin_hourly_usd_last_{}days.csv", self.days),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<(f64, f64)>,
}

/// Download hourly BTC/USD prices from CoinGecko into a CSV under the data
/// directory. Returns the written path.
pub async fn fetch_to_csv(cfg: &Config, range: &FetchRange) -> Result<PathBuf> {
    let (start, end) = range.resolve(Utc::now())?;
    std::fs::create_dir_all(&cfg.data_dir)?;

    info!(
        "Fetching BTC/USD prices from CoinGecko ({} to {})...",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );

    let client = Client::new();
    let mut req = client
        .get(format!("{}/coins/bitcoin/market_chart/range", COINGECKO_URL))
        .query(&[
            ("vs_currency", "usd".to_string()),
            ("from", start.timestamp().to_string()),
            ("to", end.timestamp().to_string()),
        ]);
    if let Some(key) = &cfg.coingecko_api_key {
        req = req.header("x-cg-demo-api-key", key);
    }

    let resp = req.send().await.context("Failed to reach CoinGecko")?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("CoinGecko API error {}: {}", status, body);
    }

    let data: MarketChartResponse = resp
        .json()
        .await
        .context("Failed to parse CoinGecko response")?;
    info!("  Fetched {} price points", data.prices.len());

    let rows: Vec<(i64, f64)> = data
        .prices
        .into_iter()
        .map(|(ts, price)| (ts as i64, price))
        .collect();

    let target = cfg.data_dir.join(range.file_name());
    write_prices_csv(&target, &rows)?;
    info!("  Saved to {}", target.display());
    Ok(target)
}

/// Write `(timestamp_ms, price_usd)` rows as `Timestamp_ms,Datetime,Price_USD`.
pub fn write_prices_csv(path: &Path, rows: &[(i64, f64)]) -> Result<(), DataError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["Timestamp_ms", "Datetime", "Price_USD"])?;

    for &(ts_ms, price) in rows {
        let Some(dt) = DateTime::from_timestamp_millis(ts_ms) else {
            warn!("Skipping out-of-range timestamp {}", ts_ms);
            continue;
        };
        wtr.write_record([
            ts_ms.to_string(),
            dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.2}", price),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Load a price table and convert USD prices with `fx_rate`.
///
/// Accepts a `Datetime` or `Timestamp_ms` time column and a `Price_USD` or
/// `Close` price column. Rows with an empty cell are dropped.
pub fn load_csv_prices(path: &Path, fx_rate: f64) -> Result<MarketData, DataError> {
    if !path.exists() {
        return Err(DataError::NotFound(path.display().to_string()));
    }

    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();

    let (price_idx, _) = find_column(&headers, &PRICE_COLUMNS)
        .ok_or(DataError::MissingColumn("Price_USD, Close"))?;
    let (time_idx, time_col) = find_column(&headers, &TIME_COLUMNS)
        .ok_or(DataError::MissingColumn("Datetime, Timestamp_ms"))?;

    let mut points = Vec::new();
    let mut dropped = 0usize;

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = i + 2;

        if record.iter().any(|cell| cell.trim().is_empty()) {
            dropped += 1;
            continue;
        }

        let raw_time = record.get(time_idx).unwrap_or_default().trim();
        let raw_price = record.get(price_idx).unwrap_or_default().trim();

        let timestamp = if time_col == "Timestamp_ms" {
            parse_millis(raw_time)
        } else {
            parse_datetime(raw_time)
        }
        .ok_or_else(|| DataError::InvalidRow {
            row,
            reason: format!("bad timestamp '{}'", raw_time),
        })?;

        let price: f64 = raw_price.parse().map_err(|_| DataError::InvalidRow {
            row,
            reason: format!("bad price '{}'", raw_price),
        })?;

        points.push(PricePoint {
            timestamp,
            price: price * fx_rate,
        });
    }

    if dropped > 0 {
        debug!("Dropped {} incomplete rows from {}", dropped, path.display());
    }
    if points.is_empty() {
        return Err(DataError::Empty(path.display().to_string()));
    }

    info!(
        "Loaded {} prices from {} (fx {:.4})",
        points.len(),
        path.display(),
        fx_rate
    );
    Ok(MarketData::new(points))
}

/// First of `names` present in `headers`, with its position.
fn find_column(
    headers: &csv::StringRecord,
    names: &[&'static str],
) -> Option<(usize, &'static str)> {
    names.iter().find_map(|&name| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .map(|i| (i, name))
    })
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    let ms = raw
        .parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|f| f as i64))?;
    DateTime::from_timestamp_millis(ms)
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    #[test]
    fn loads_price_usd_with_fx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        fs::write(
            &path,
            "Timestamp_ms,Datetime,Price_USD\n\
             1704067200000,2024-01-01 00:00:00,100.0\n\
             1704070800000,2024-01-01 01:00:00,\n\
             1704074400000,2024-01-01 02:00:00,102.5\n",
        )
        .unwrap();

        let md = load_csv_prices(&path, 2.0).unwrap();
        assert_eq!(md.len(), 2);
        assert_eq!(md.prices(), vec![200.0, 205.0]);
        assert_eq!(
            md.timestamp_at(1),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn accepts_close_and_millis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ohlc.csv");
        fs::write(&path, "Timestamp_ms,Open,Close\n1704067200000,1,10\n").unwrap();

        let md = load_csv_prices(&path, 1.0).unwrap();
        assert_eq!(md.prices(), vec![10.0]);
        assert_eq!(
            md.timestamp_at(0),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn missing_columns_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "Datetime,Volume\n2024-01-01 00:00:00,3\n").unwrap();
        assert!(matches!(
            load_csv_prices(&path, 1.0),
            Err(DataError::MissingColumn(_))
        ));
        assert!(matches!(
            load_csv_prices(&dir.path().join("none.csv"), 1.0),
            Err(DataError::NotFound(_))
        ));
    }

    #[test]
    fn bad_price_reports_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "Datetime,Close\n2024-01-01 00:00:00,abc\n").unwrap();
        assert!(matches!(
            load_csv_prices(&path, 1.0),
            Err(DataError::InvalidRow { row: 2, .. })
        ));
    }

    #[test]
    fn written_csv_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_prices_csv(&path, &[(1704067200000, 42000.123), (1704070800000, 42100.0)]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Timestamp_ms,Datetime,Price_USD\n"));
        assert!(text.contains("2024-01-01 00:00:00,42000.12"));

        let md = load_csv_prices(&path, 1.0).unwrap();
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn range_resolution() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        let (start, end) = FetchRange::default().resolve(now).unwrap();
        assert_eq!(end - start, Duration::days(30));

        let explicit = FetchRange {
            days: 30,
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        };
        assert!(matches!(
            explicit.resolve(now),
            Err(DataError::InvalidRange(_))
        ));
        assert_eq!(
            FetchRange {
                days: 30,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                end_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            }
            .file_name(),
            "bitcoin_data_2024-01-01_to_2024-02-01.csv"
        );
    }
}
