pub mod exit_reason;
pub mod market;
pub mod tranche;

pub use exit_reason::*;
pub use market::{MarketData, PricePoint};
pub use tranche::Tranche;
