pub mod backtesting;
pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod logging;
pub mod models;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
