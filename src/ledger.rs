use serde::{Deserialize, Serialize};

use crate::{normalizer::Metal, utils::round_unit};

/// Default number of rows the ledger keeps.
pub const LEDGER_CAPACITY: usize = 20;

/// Column order of the persisted table.
pub const COLUMNS: [&str; 7] = [
    "date",
    "time",
    "fx_rate",
    "ose_gold_ref",
    "gold_spread",
    "ose_plat_ref",
    "plat_spread",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadSide {
    /// Domestic reference above the foreign theoretical price.
    Premium,
    /// Domestic reference at or below the foreign theoretical price.
    Discount,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub value: f64,
    pub side: SpreadSide,
    /// Set when there was no live price to compare against.
    pub low_confidence: bool,
}

/// `reference - normalized`. With no live price the spread degenerates to the
/// reference itself and is flagged low-confidence.
pub fn compute_spread(reference: f64, normalized_price: f64) -> Spread {
    let live = if normalized_price.is_finite() && normalized_price > 0.0 {
        normalized_price
    } else {
        0.0
    };
    let value = reference - live;
    Spread {
        value,
        side: if value > 0.0 { SpreadSide::Premium } else { SpreadSide::Discount },
        low_confidence: live == 0.0,
    }
}

/// One-step persistence forecast: today's live price plus the last recorded gap.
pub fn predict_price(live_normalized_price: f64, latest_spread: f64) -> f64 {
    if live_normalized_price.is_finite() && live_normalized_price > 0.0 {
        live_normalized_price + latest_spread
    } else {
        0.0
    }
}

/// A persisted comparison row. All amounts are whole domestic currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub date: String,
    pub time: String,
    pub fx_rate: i64,
    pub ose_gold_ref: i64,
    pub gold_spread: i64,
    pub ose_plat_ref: i64,
    pub plat_spread: i64,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        date: &str,
        time: &str,
        fx_rate: f64,
        gold_ref: f64,
        gold_spread: f64,
        plat_ref: f64,
        plat_spread: f64,
    ) -> Self {
        Self {
            date: date.to_string(),
            time: time.to_string(),
            fx_rate: round_unit(fx_rate),
            ose_gold_ref: round_unit(gold_ref),
            gold_spread: round_unit(gold_spread),
            ose_plat_ref: round_unit(plat_ref),
            plat_spread: round_unit(plat_spread),
        }
    }

    pub fn spread(&self, metal: Metal) -> i64 {
        match metal {
            Metal::Gold => self.gold_spread,
            Metal::Platinum => self.plat_spread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_sign_and_side() {
        let premium = compute_spread(13_500.0, 13_000.0);
        assert_eq!(premium.value, 500.0);
        assert_eq!(premium.side, SpreadSide::Premium);
        assert!(!premium.low_confidence);

        let discount = compute_spread(13_000.0, 13_500.0);
        assert_eq!(discount.value, -500.0);
        assert_eq!(discount.side, SpreadSide::Discount);
    }

    #[test]
    fn zero_spread_is_discount() {
        let s = compute_spread(4_600.0, 4_600.0);
        assert_eq!(s.value, 0.0);
        assert_eq!(s.side, SpreadSide::Discount);
    }

    #[test]
    fn unavailable_price_is_low_confidence() {
        let s = compute_spread(13_500.0, 0.0);
        assert_eq!(s.value, 13_500.0);
        assert!(s.low_confidence);
    }

    #[test]
    fn prediction_adds_latest_spread() {
        assert_eq!(predict_price(12_000.0, 300.0), 12_300.0);
        assert_eq!(predict_price(12_000.0, -250.0), 11_750.0);
        assert_eq!(predict_price(0.0, 300.0), 0.0);
    }

    #[test]
    fn entry_rounds_every_amount() {
        let e = LedgerEntry::new("2024-05-01", "09:15", 151.49, 13_500.4, 212.6, 4_600.0, -88.5);
        assert_eq!(e.fx_rate, 151);
        assert_eq!(e.ose_gold_ref, 13_500);
        assert_eq!(e.gold_spread, 213);
        assert_eq!(e.plat_spread, -88);
        assert_eq!(e.spread(Metal::Gold), 213);
        assert_eq!(e.spread(Metal::Platinum), -88);
        assert_eq!(e.ose_plat_ref, 4_600);
    }
}
