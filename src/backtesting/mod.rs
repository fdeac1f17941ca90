#[cfg(feature = "charts")]
pub mod chart;
pub mod data_fetcher;
pub mod report;
pub mod runner;

pub use data_fetcher::{fetch_to_csv, load_csv_prices, FetchRange};
pub use report::SimulationReport;
pub use runner::{RunSummary, Simulator};
