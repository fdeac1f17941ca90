pub mod account;
pub mod engine;
pub mod execution;
pub mod price_source;

pub use account::{AccountState, Marker, OperationRecord};
pub use engine::{OperationOutcome, RiskLimits, TradingEngine};
pub use execution::{BuyFill, FeeModel, SellFill};
pub use price_source::{PriceSource, PriceTick};
