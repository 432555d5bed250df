use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::{ledger::LEDGER_CAPACITY, normalizer::Metal};

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<f64>()
            .map_err(|e| anyhow!("{key} invalid float: {e}"))?),
    }
}

fn get_env_i64(key: &str, default: i64) -> Result<i64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<i64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Sources
    pub fx_url: String,
    pub gold_url: String,
    pub plat_url: String,
    pub cn_url: String,
    pub cn_enabled: bool,
    pub domestic_ccy: String,
    pub fetch_timeout_ms: u64,

    // Ledger
    pub history_path: String,
    pub history_capacity: usize,
    pub tz_offset_hours: i32,
    pub auto_record: bool,

    // Session reference prices (domestic currency per gram)
    pub gold_ref: f64,
    pub plat_ref: f64,

    // Loop timing; 0 disables background polling
    pub poll_secs: u64,

    // Dashboard
    pub dashboard_enabled: bool,
    pub dashboard_host: String,
    pub dashboard_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fx_url: "https://api.exchangerate-api.com/v4/latest/USD".to_string(),
            gold_url: "https://api.coingecko.com/api/v3/simple/price?ids=pax-gold&vs_currencies=usd"
                .to_string(),
            plat_url: "https://query1.finance.yahoo.com/v8/finance/chart/PL=F?interval=1d&range=1d"
                .to_string(),
            cn_url: "https://hq.sinajs.cn/list=nf_au0,nf_pt0".to_string(),
            cn_enabled: true,
            domestic_ccy: "JPY".to_string(),
            fetch_timeout_ms: 3000,
            history_path: "./data/price_history.sqlite".to_string(),
            history_capacity: LEDGER_CAPACITY,
            tz_offset_hours: 9,
            auto_record: false,
            gold_ref: 13_500.0,
            plat_ref: 4_600.0,
            poll_secs: 60,
            dashboard_enabled: true,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 8000,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let d = Self::default();

        let s = Self {
            fx_url: get_env_string("FX_URL", &d.fx_url),
            gold_url: get_env_string("GOLD_URL", &d.gold_url),
            plat_url: get_env_string("PLAT_URL", &d.plat_url),
            cn_url: get_env_string("CN_URL", &d.cn_url),
            cn_enabled: get_env_bool("CN_ENABLED", d.cn_enabled),
            domestic_ccy: get_env_string("DOMESTIC_CCY", &d.domestic_ccy).to_uppercase(),
            fetch_timeout_ms: get_env_i64("FETCH_TIMEOUT_MS", d.fetch_timeout_ms as i64)?.max(0) as u64,
            history_path: get_env_string("HISTORY_PATH", &d.history_path),
            history_capacity: get_env_i64("HISTORY_CAPACITY", d.history_capacity as i64)?.max(0) as usize,
            tz_offset_hours: get_env_i64("TZ_OFFSET_HOURS", d.tz_offset_hours as i64)?
                .clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            auto_record: get_env_bool("AUTO_RECORD", d.auto_record),
            gold_ref: get_env_f64("GOLD_REF", d.gold_ref)?,
            plat_ref: get_env_f64("PLAT_REF", d.plat_ref)?,
            poll_secs: get_env_i64("POLL_SECS", d.poll_secs as i64)?.max(0) as u64,
            dashboard_enabled: get_env_bool("DASHBOARD_ENABLED", d.dashboard_enabled),
            dashboard_host: get_env_string("DASHBOARD_HOST", &d.dashboard_host),
            dashboard_port: get_env_i64("DASHBOARD_PORT", d.dashboard_port as i64)?
                .clamp(0, u16::MAX as i64) as u16,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn reference(&self, metal: Metal) -> f64 {
        match metal {
            Metal::Gold => self.gold_ref,
            Metal::Platinum => self.plat_ref,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(500..=10_000).contains(&self.fetch_timeout_ms) {
            return Err(anyhow!(
                "FETCH_TIMEOUT_MS must be within 500..=10000 (got {})",
                self.fetch_timeout_ms
            ));
        }
        if !(1..=LEDGER_CAPACITY).contains(&self.history_capacity) {
            return Err(anyhow!(
                "HISTORY_CAPACITY must be within 1..={} (got {})",
                LEDGER_CAPACITY,
                self.history_capacity
            ));
        }
        if !(-12..=14).contains(&self.tz_offset_hours) {
            return Err(anyhow!(
                "TZ_OFFSET_HOURS must be within -12..=14 (got {})",
                self.tz_offset_hours
            ));
        }
        if self.domestic_ccy.len() != 3 || !self.domestic_ccy.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(anyhow!("DOMESTIC_CCY must be a 3-letter code (got {})", self.domestic_ccy));
        }
        for (key, v) in [("GOLD_REF", self.gold_ref), ("PLAT_REF", self.plat_ref)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(anyhow!("{key} must be > 0 (got {v})"));
            }
        }
        if self.history_path.trim().is_empty() {
            return Err(anyhow!("HISTORY_PATH is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.history_capacity, 20);
        assert_eq!(s.reference(Metal::Gold), 13_500.0);
        assert_eq!(s.reference(Metal::Platinum), 4_600.0);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let s = Settings { fetch_timeout_ms: 60_000, ..Settings::default() };
        assert!(s.validate().is_err());

        let s = Settings { history_capacity: 0, ..Settings::default() };
        assert!(s.validate().is_err());

        let s = Settings { history_capacity: 25, ..Settings::default() };
        assert!(s.validate().is_err());

        let s = Settings { history_capacity: 5, ..Settings::default() };
        s.validate().unwrap();

        let s = Settings { tz_offset_hours: 20, ..Settings::default() };
        assert!(s.validate().is_err());

        let s = Settings { domestic_ccy: "YEN!".into(), ..Settings::default() };
        assert!(s.validate().is_err());

        let s = Settings { plat_ref: -1.0, ..Settings::default() };
        assert!(s.validate().is_err());

        let s = Settings { gold_ref: 0.0, ..Settings::default() };
        assert!(s.validate().is_err());
    }
}
