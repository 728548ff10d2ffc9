use serde::{Deserialize, Serialize};

/// Price record stored per card name in the price cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    /// Latest known USD price, falling back to `min` when upstream has none.
    pub latest: f64,
    /// Cheapest printing.
    pub min: f64,
    /// Most expensive printing.
    pub max: f64,
}

impl PriceData {
    /// Combines a latest-price lookup with a min/max lookup.
    ///
    /// A missing or non-positive latest price falls back to the range minimum.
    pub fn from_lookup(latest: Option<f64>, range: PriceRange) -> Self {
        let latest = latest.filter(|price| *price > 0.0).unwrap_or(range.min);
        Self {
            latest,
            min: range.min,
            max: range.max,
        }
    }
}

/// Min/max USD price across every printing of a card name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lookup_prefers_positive_latest() {
        let price = PriceData::from_lookup(Some(3.5), PriceRange { min: 1.0, max: 9.0 });
        assert_eq!(price, PriceData { latest: 3.5, min: 1.0, max: 9.0 });
    }

    #[test]
    fn test_from_lookup_falls_back_to_min() {
        let range = PriceRange { min: 0.25, max: 4.0 };
        assert_eq!(PriceData::from_lookup(None, range).latest, 0.25);
        assert_eq!(PriceData::from_lookup(Some(0.0), range).latest, 0.25);
    }
}
