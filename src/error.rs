use thiserror::Error;

/// Invalid trading parameters. Fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("tranches_buy has {tranches} entries but levels_buy has {levels}")]
    BuyLengthMismatch { tranches: usize, levels: usize },

    #[error("tranches_sell has {tranches} entries but levels_sell has {levels}")]
    SellLengthMismatch { tranches: usize, levels: usize },

    #[error("buy tranche fractions must sum to 1.0 (got {0})")]
    BuyFractionSum(f64),

    #[error("sell tranche fractions must sum to 1.0 (got {0})")]
    SellFractionSum(f64),

    #[error("every buy level must be negative (got {0})")]
    BuyLevelNotNegative(f64),

    #[error("every sell level must be positive (got {0})")]
    SellLevelNotPositive(f64),

    #[error("tranche fractions must be positive (got {0})")]
    FractionNotPositive(f64),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Live venues are placeholders and refuse to trade.
    #[error("{venue} integration is not implemented: refusing to {action}")]
    NotImplemented {
        venue: &'static str,
        action: &'static str,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from {venue}: {detail}")]
    BadResponse { venue: &'static str, detail: String },
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("price file not found: {0}")]
    NotFound(String),

    #[error("missing column: expected one of {0}")]
    MissingColumn(&'static str),

    #[error("row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("no usable price rows in {0}")]
    Empty(String),

    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart rendering failed: {0}")]
    Plotters(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
