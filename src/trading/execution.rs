use serde::{Deserialize, Serialize};
use tracing::warn;

/// Result of a buy: base-asset quantity received and the fee charged.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BuyFill {
    pub quantity: f64,
    pub fee: f64,
}

impl BuyFill {
    pub fn is_empty(&self) -> bool {
        self.quantity <= 0.0
    }
}

/// Result of a sell: gross proceeds and the fee charged on them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SellFill {
    pub proceeds: f64,
    pub fee: f64,
}

impl SellFill {
    pub fn net(&self) -> f64 {
        self.proceeds - self.fee
    }
}

/// Flat proportional fee applied to every fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeModel {
    pub fee_rate: f64,
}

impl FeeModel {
    pub fn new(fee_rate: f64) -> Self {
        Self { fee_rate }
    }

    /// Spend `notional` at `price`. The fee comes out of the notional, so the
    /// account is debited exactly `notional`.
    pub fn buy(&self, notional: f64, price: f64) -> BuyFill {
        if notional <= 0.0 || price <= 0.0 {
            warn!(notional, price, "Invalid buy request, no fill");
            return BuyFill::default();
        }
        let fee = notional * self.fee_rate;
        BuyFill {
            quantity: (notional - fee) / price,
            fee,
        }
    }

    pub fn sell(&self, quantity: f64, price: f64) -> SellFill {
        if quantity <= 0.0 || price <= 0.0 {
            warn!(quantity, price, "Invalid sell request, no fill");
            return SellFill::default();
        }
        let proceeds = quantity * price;
        SellFill {
            proceeds,
            fee: proceeds * self.fee_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_carves_fee_from_notional() {
        let fees = FeeModel::new(0.002);
        let fill = fees.buy(1000.0, 100.0);
        assert!((fill.fee - 2.0).abs() < 1e-12);
        assert!((fill.quantity - 9.98).abs() < 1e-12);
        assert!((fill.quantity * 100.0 + fill.fee - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_guards_return_empty_fills() {
        let fees = FeeModel::new(0.002);
        assert_eq!(fees.buy(0.0, 100.0), BuyFill::default());
        assert_eq!(fees.buy(-5.0, 100.0), BuyFill::default());
        assert_eq!(fees.buy(100.0, 0.0), BuyFill::default());
        assert_eq!(fees.sell(0.0, 100.0), SellFill::default());
        assert_eq!(fees.sell(1.0, -1.0), SellFill::default());
    }

    #[test]
    fn sell_fee_is_flat_on_proceeds() {
        let fees = FeeModel::new(0.005);
        let fill = fees.sell(2.0, 50_000.0);
        assert_eq!(fill.proceeds, 100_000.0);
        assert!((fill.fee - 500.0).abs() < 1e-9);
        assert!((fill.net() - 99_500.0).abs() < 1e-9);
    }

    #[test]
    fn zero_fee_round_trip_is_flat() {
        let fees = FeeModel::new(0.0);
        let buy = fees.buy(5000.0, 100_000.0);
        let sell = fees.sell(buy.quantity, 100_000.0);
        assert_eq!(buy.fee, 0.0);
        assert!((sell.net() - 5000.0).abs() < 1e-9);
    }
}
