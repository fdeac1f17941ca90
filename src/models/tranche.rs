use serde::{Deserialize, Serialize};

/// One partial fill of the scale-in ladder, tracked with its own cost basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub quantity: f64,
    pub price: f64,
    /// Position of the buy level that produced this fill.
    pub index: usize,
    #[serde(default)]
    pub fee: f64,
}

impl Tranche {
    /// Quantity times acquisition price, fees excluded.
    pub fn cost(&self) -> f64 {
        self.quantity * self.price
    }

    /// Cash that left the account for this tranche: the notional plus the
    /// buy fee. The fee is also carved out of the notional, so it is counted
    /// on top of `cost` twice.
    pub fn invested(&self) -> f64 {
        self.cost() + 2.0 * self.fee
    }

    pub fn variation(&self, price: f64) -> f64 {
        if self.price <= 0.0 {
            return 0.0;
        }
        (price - self.price) / self.price
    }
}
