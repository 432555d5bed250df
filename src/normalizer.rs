//! Conversion of heterogeneous metal quotes into a domestic price per gram.
//!
//! Every function here is pure. Zero is the "unavailable" marker: a zero (or
//! negative, NaN, non-numeric) input anywhere yields zero out, never a fault.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Grams in one troy ounce.
pub const TROY_OUNCE_GRAMS: f64 = 31.1034768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    Gold,
    Platinum,
}

impl Metal {
    pub const ALL: [Metal; 2] = [Metal::Gold, Metal::Platinum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metal::Gold => "gold",
            Metal::Platinum => "platinum",
        }
    }
}

impl fmt::Display for Metal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gold" | "au" | "xau" => Ok(Metal::Gold),
            "platinum" | "plat" | "pt" | "xpt" => Ok(Metal::Platinum),
            other => Err(format!("unknown metal: {other}")),
        }
    }
}

/// Unit a raw metal quote is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    PerTroyOunce,
    PerGram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    FxRate,
    MetalUsdPerOz,
    MetalCnyPerGram,
    /// Price picked from a futures row by [`futures_price`], CNY per gram.
    MetalFuturesRaw,
}

impl QuoteSource {
    pub fn unit(&self) -> Option<Unit> {
        match self {
            QuoteSource::FxRate => None,
            QuoteSource::MetalUsdPerOz => Some(Unit::PerTroyOunce),
            QuoteSource::MetalCnyPerGram | QuoteSource::MetalFuturesRaw => Some(Unit::PerGram),
        }
    }
}

/// One market input for the current refresh cycle. `value == 0` means unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub source: QuoteSource,
    pub value: f64,
}

impl Quote {
    pub fn new(source: QuoteSource, value: f64) -> Self {
        Self { source, value: sanitize(value) }
    }

    /// Quote for a futures row: last traded, or previous settlement before the
    /// first trade of the session.
    pub fn futures(last_traded: f64, previous_settlement: f64) -> Self {
        Self::new(
            QuoteSource::MetalFuturesRaw,
            futures_price(last_traded, previous_settlement),
        )
    }

    /// Domestic price per gram using `rate` (base currency -> domestic).
    /// FX quotes are not prices and normalise to zero.
    pub fn per_gram(&self, rate: f64) -> f64 {
        match self.source.unit() {
            Some(unit) => normalize(self.value, unit, rate),
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPrice {
    pub metal: Metal,
    pub price_per_gram: f64,
}

impl NormalizedPrice {
    pub fn is_available(&self) -> bool {
        self.price_per_gram > 0.0
    }
}

/// Clamp anything that is not a finite positive number to zero.
pub fn sanitize(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Parse an upstream text field; non-numeric text is zero.
pub fn parse_price(raw: &str) -> f64 {
    raw.trim().parse::<f64>().map(sanitize).unwrap_or(0.0)
}

pub fn normalize(raw_value: f64, unit: Unit, conversion_rate: f64) -> f64 {
    let raw_value = sanitize(raw_value);
    let conversion_rate = sanitize(conversion_rate);
    if raw_value == 0.0 || conversion_rate == 0.0 {
        return 0.0;
    }
    match unit {
        Unit::PerTroyOunce => (raw_value / TROY_OUNCE_GRAMS) * conversion_rate,
        Unit::PerGram => raw_value * conversion_rate,
    }
}

/// Last traded price, or previous settlement while the session has not traded yet.
pub fn futures_price(last_traded: f64, previous_settlement: f64) -> f64 {
    let last = sanitize(last_traded);
    if last > 0.0 {
        last
    } else {
        sanitize(previous_settlement)
    }
}

/// Domestic units per one unit of a third currency, given both priced in USD.
/// `domestic_per_usd / other_per_usd`, zero when either side is unavailable.
pub fn cross_rate(domestic_per_usd: f64, other_per_usd: f64) -> f64 {
    let d = sanitize(domestic_per_usd);
    let o = sanitize(other_per_usd);
    if d == 0.0 || o == 0.0 {
        return 0.0;
    }
    d / o
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ounce_at_unit_rate_is_one_hundred_per_gram() {
        let p = normalize(3110.34768, Unit::PerTroyOunce, 1.0);
        assert!((p - 100.0).abs() < 1e-9, "got {p}");
    }

    #[test]
    fn gram_quotes_scale_by_rate() {
        assert!((normalize(560.0, Unit::PerGram, 21.0) - 11760.0).abs() < 1e-9);
    }

    #[test]
    fn zero_inputs_propagate_to_zero() {
        for unit in [Unit::PerTroyOunce, Unit::PerGram] {
            assert_eq!(normalize(0.0, unit, 150.0), 0.0);
            assert_eq!(normalize(2400.0, unit, 0.0), 0.0);
            assert_eq!(normalize(0.0, unit, 0.0), 0.0);
        }
    }

    #[test]
    fn garbage_inputs_are_unavailable() {
        assert_eq!(normalize(-5.0, Unit::PerGram, 20.0), 0.0);
        assert_eq!(normalize(f64::NAN, Unit::PerTroyOunce, 150.0), 0.0);
        assert_eq!(normalize(2400.0, Unit::PerTroyOunce, f64::INFINITY), 0.0);
        assert_eq!(parse_price("--"), 0.0);
        assert_eq!(parse_price(" 552.30 "), 552.30);
        assert_eq!(parse_price("-1"), 0.0);
    }

    #[test]
    fn futures_prefers_last_traded() {
        assert_eq!(futures_price(560.5, 555.0), 560.5);
        assert_eq!(futures_price(0.0, 555.0), 555.0);
        assert_eq!(futures_price(f64::NAN, 555.0), 555.0);
        assert_eq!(futures_price(0.0, 0.0), 0.0);

        let settled = Quote::futures(parse_price("0.000"), parse_price("555.00"));
        assert_eq!(settled.source, QuoteSource::MetalFuturesRaw);
        assert_eq!(settled.value, 555.0);
        assert_eq!(Quote::futures(parse_price(""), 555.0).value, 555.0);
        assert_eq!(Quote::futures(parse_price("561.2"), parse_price("x")).value, 561.2);
    }

    #[test]
    fn quote_per_gram_follows_source_unit() {
        let usd = Quote::new(QuoteSource::MetalUsdPerOz, 3110.34768);
        assert!((usd.per_gram(150.0) - 15_000.0).abs() < 1e-6);

        let cny = Quote::new(QuoteSource::MetalFuturesRaw, 550.0);
        assert!((cny.per_gram(20.0) - 11_000.0).abs() < 1e-9);

        let fx = Quote::new(QuoteSource::FxRate, 150.0);
        assert_eq!(fx.per_gram(1.0), 0.0);

        let neg = Quote::new(QuoteSource::MetalCnyPerGram, -3.0);
        assert_eq!(neg.value, 0.0);
        assert_eq!(neg.per_gram(20.0), 0.0);
    }

    #[test]
    fn cross_rate_divides_usd_legs() {
        assert!((cross_rate(150.0, 7.5) - 20.0).abs() < 1e-12);
        assert_eq!(cross_rate(150.0, 0.0), 0.0);
        assert_eq!(cross_rate(0.0, 7.5), 0.0);
    }

    #[test]
    fn metal_parses_aliases() {
        assert_eq!("Gold".parse::<Metal>(), Ok(Metal::Gold));
        assert_eq!("pt".parse::<Metal>(), Ok(Metal::Platinum));
        assert!("silver".parse::<Metal>().is_err());
    }
}
