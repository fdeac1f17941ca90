use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Ordered price series replayed by the simulator. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarketData {
    points: Vec<PricePoint>,
}

impl MarketData {
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self { points }
    }

    pub fn from_raw(timestamps: Vec<DateTime<Utc>>, prices: Vec<f64>) -> Self {
        let points = timestamps
            .into_iter()
            .zip(prices)
            .map(|(timestamp, price)| PricePoint { timestamp, price })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PricePoint> {
        self.points.get(index)
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn price_min(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.price)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn price_max(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.price)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Timestamp of the point at `index`, if the series still has one.
    pub fn timestamp_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.points.get(index).map(|p| p.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn from_raw_pairs_in_order() {
        let base = Utc::now();
        let md = MarketData::from_raw(
            vec![base, base + Duration::hours(1)],
            vec![100.0, 101.0],
        );
        assert_eq!(md.len(), 2);
        assert_eq!(md.get(1).unwrap().price, 101.0);
        assert_eq!(md.timestamp_at(0), Some(base));
        assert_eq!(md.timestamp_at(2), None);
    }

    #[test]
    fn min_max_over_prices() {
        let base = Utc::now();
        let md = MarketData::from_raw(vec![base; 3], vec![5.0, 2.0, 9.0]);
        assert_eq!(md.price_min(), 2.0);
        assert_eq!(md.price_max(), 9.0);
    }
}
