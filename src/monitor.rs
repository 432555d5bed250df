use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::Settings,
    feed_handler::{empty_snapshot, FeedHandler, FeedState, Market, MarketSnapshot, RawQuotes},
    ledger::{compute_spread, predict_price, LedgerEntry, Spread},
    normalizer::Metal,
    store::{LedgerStore, StorageError, StorageResult},
    utils::{date_time_stamp, domestic_now, now_ts},
};

#[derive(Debug, Error)]
pub enum SaveError {
    /// A dollar-basis price is unavailable, so no spread can be recorded.
    #[error("no live {0} price, nothing recorded")]
    NoLivePrice(Metal),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Domestic reference prices per gram, entered by the user for this session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePrices {
    pub gold: f64,
    pub platinum: f64,
}

impl ReferencePrices {
    pub fn get(&self, metal: Metal) -> f64 {
        match metal {
            Metal::Gold => self.gold,
            Metal::Platinum => self.platinum,
        }
    }
}

/// One (market, metal) row of the comparison view.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub market: Market,
    pub metal: Metal,
    pub raw_quote: f64,
    pub price_per_gram: f64,
    pub reference: f64,
    /// Absent when there is no live price to compare against.
    pub spread: Option<Spread>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub metal: Metal,
    pub live_price: f64,
    pub latest_spread: i64,
    pub predicted: f64,
}

/// The core the presentation layer talks to: refresh, save, history, predict.
#[derive(Clone)]
pub struct Monitor {
    settings: Settings,
    feed: FeedHandler,
    state: FeedState,
    store: LedgerStore,
    references: Arc<RwLock<ReferencePrices>>,
}

impl Monitor {
    pub fn new(settings: Settings, store: LedgerStore) -> Result<Self> {
        let feed = FeedHandler::new(&settings)?;
        let references = ReferencePrices {
            gold: settings.reference(Metal::Gold),
            platinum: settings.reference(Metal::Platinum),
        };
        Ok(Self {
            settings,
            feed,
            state: FeedState::new(),
            store,
            references: Arc::new(RwLock::new(references)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fetch all sources and publish the normalised snapshot.
    pub async fn refresh(&self) -> Arc<MarketSnapshot> {
        let raw = self.feed.fetch_all().await;
        self.apply(&raw)
    }

    pub fn apply(&self, raw: &RawQuotes) -> Arc<MarketSnapshot> {
        let snap = self.state.publish(MarketSnapshot::from_raw(raw, now_ts()));
        log::info!(
            "monitor.refresh fx={:.2} gold={:.0} plat={:.0} cn_gold={:.0} cn_plat={:.0} issues={}",
            snap.fx_rate,
            snap.us_gold_per_gram,
            snap.us_plat_per_gram,
            snap.cn_gold_per_gram,
            snap.cn_plat_per_gram,
            snap.issues.len()
        );
        snap
    }

    /// Latest snapshot, or an all-unavailable one before the first refresh.
    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        self.state
            .latest()
            .unwrap_or_else(|| Arc::new(empty_snapshot()))
    }

    pub fn references(&self) -> ReferencePrices {
        *self.references.read()
    }

    pub fn set_references(&self, gold: Option<f64>, platinum: Option<f64>) -> ReferencePrices {
        let mut r = self.references.write();
        if let Some(g) = gold.filter(|v| v.is_finite() && *v > 0.0) {
            r.gold = g;
        }
        if let Some(p) = platinum.filter(|v| v.is_finite() && *v > 0.0) {
            r.platinum = p;
        }
        *r
    }

    pub fn comparisons(&self) -> Vec<Comparison> {
        let snap = self.snapshot();
        let refs = self.references();
        let mut out = Vec::with_capacity(4);
        for market in Market::ALL {
            for metal in Metal::ALL {
                let price = snap.normalized(market, metal);
                let reference = refs.get(metal);
                out.push(Comparison {
                    market,
                    metal,
                    raw_quote: snap.raw_quote(market, metal),
                    price_per_gram: price.price_per_gram,
                    reference,
                    spread: price
                        .is_available()
                        .then(|| compute_spread(reference, price.price_per_gram)),
                });
            }
        }
        out
    }

    /// Record today's comparison against the dollar-basis prices of the latest snapshot.
    /// Refused while either dollar-basis price is unavailable.
    pub fn save(&self, gold_ref: Option<f64>, plat_ref: Option<f64>) -> Result<LedgerEntry, SaveError> {
        self.save_at(&domestic_now(self.settings.tz_offset_hours), gold_ref, plat_ref)
    }

    pub fn save_at(
        &self,
        at: &DateTime<FixedOffset>,
        gold_ref: Option<f64>,
        plat_ref: Option<f64>,
    ) -> Result<LedgerEntry, SaveError> {
        let refs = self.set_references(gold_ref, plat_ref);
        let snap = self.snapshot();
        for metal in Metal::ALL {
            if !snap.normalized(Market::Us, metal).is_available() {
                log::warn!("monitor.save.skipped metal={metal} reason=no_live_price");
                return Err(SaveError::NoLivePrice(metal));
            }
        }

        let gold = compute_spread(refs.gold, snap.us_gold_per_gram);
        let plat = compute_spread(refs.platinum, snap.us_plat_per_gram);

        let (date, time) = date_time_stamp(at);
        let entry = LedgerEntry::new(
            &date,
            &time,
            snap.fx_rate,
            refs.gold,
            gold.value,
            refs.platinum,
            plat.value,
        );
        self.store.record_entry(&entry)?;
        Ok(entry)
    }

    /// Save with the current references after a poll. Skips quietly while the
    /// dollar-basis prices are down.
    pub fn auto_record(&self) -> Option<LedgerEntry> {
        match self.save(None, None) {
            Ok(e) => {
                log::info!("monitor.auto_record date={} time={}", e.date, e.time);
                Some(e)
            }
            Err(SaveError::NoLivePrice(metal)) => {
                log::debug!("monitor.auto_record.skip metal={metal}");
                None
            }
            Err(e) => {
                log::error!("monitor.auto_record.error {}", e);
                None
            }
        }
    }

    pub fn history(&self) -> StorageResult<Vec<LedgerEntry>> {
        self.store.history()
    }

    pub fn predict(&self, metal: Metal) -> StorageResult<Prediction> {
        let latest_spread = self.store.latest_spread(metal)?;
        let live_price = self.snapshot().normalized(Market::Us, metal).price_per_gram;
        Ok(Prediction {
            metal,
            live_price,
            latest_spread,
            predicted: predict_price(live_price, latest_spread as f64),
        })
    }
}

/// Background refresh loop. Returns immediately after one refresh when polling is disabled.
pub async fn run(monitor: Monitor) -> Result<()> {
    let poll_secs = monitor.settings.poll_secs;
    if poll_secs == 0 {
        monitor.refresh().await;
        return Ok(());
    }

    let mut tick = tokio::time::interval(std::time::Duration::from_secs(poll_secs));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        monitor.refresh().await;
        if monitor.settings.auto_record {
            monitor.auto_record();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed_handler::FeedError;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn test_monitor() -> (Monitor, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.sqlite");
        let settings = Settings {
            history_path: path.to_str().unwrap().to_string(),
            fx_url: "http://127.0.0.1:9/fx".into(),
            gold_url: "http://127.0.0.1:9/gold".into(),
            plat_url: "http://127.0.0.1:9/plat".into(),
            cn_url: "http://127.0.0.1:9/cn".into(),
            fetch_timeout_ms: 500,
            ..Settings::default()
        };
        let store = LedgerStore::with_capacity(&settings.history_path, 20).unwrap();
        store.init_db().unwrap();
        (Monitor::new(settings, store).unwrap(), dir)
    }

    fn live_quotes() -> RawQuotes {
        RawQuotes {
            domestic_per_usd: Ok(150.0),
            cny_per_usd: Ok(7.5),
            // 13 000 and 4 500 per gram at 150.
            us_gold_usd_oz: Ok(13_000.0 * 31.1034768 / 150.0),
            us_plat_usd_oz: Ok(4_500.0 * 31.1034768 / 150.0),
            cn_gold_cny_g: Ok(560.0),
            cn_plat_cny_g: Err(FeedError::Timeout),
        }
    }

    fn jst(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, d, h, m, 0)
            .unwrap()
    }

    #[test]
    fn save_records_spreads_against_dollar_basis() {
        let (m, _dir) = test_monitor();
        m.apply(&live_quotes());

        let e = m.save_at(&jst(3, 9, 5), Some(13_500.0), Some(4_400.0)).unwrap();
        assert_eq!(e.date, "2024-06-03");
        assert_eq!(e.time, "09:05");
        assert_eq!(e.fx_rate, 150);
        assert_eq!(e.gold_spread, 500);
        assert_eq!(e.plat_spread, -100);
        assert_eq!(m.references(), ReferencePrices { gold: 13_500.0, platinum: 4_400.0 });
        assert_eq!(m.history().unwrap(), vec![e]);
    }

    #[test]
    fn save_same_day_keeps_latest() {
        let (m, _dir) = test_monitor();
        m.apply(&live_quotes());
        m.save_at(&jst(3, 9, 0), Some(13_100.0), None).unwrap();
        let second = m.save_at(&jst(3, 15, 0), Some(13_300.0), None).unwrap();

        let rows = m.history().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], second);
        assert_eq!(rows[0].gold_spread, 300);
    }

    #[test]
    fn predict_uses_latest_recorded_spread() {
        let (m, _dir) = test_monitor();
        m.apply(&live_quotes());
        m.save_at(&jst(4, 10, 0), Some(13_300.0), Some(4_500.0)).unwrap();

        let p = m.predict(Metal::Gold).unwrap();
        assert_eq!(p.latest_spread, 300);
        assert!((p.predicted - 13_300.0).abs() < 1e-6);

        let p = m.predict(Metal::Platinum).unwrap();
        assert_eq!(p.latest_spread, 0);
        assert!((p.predicted - 4_500.0).abs() < 1e-6);
    }

    #[test]
    fn predict_without_live_price_is_zero() {
        let (m, _dir) = test_monitor();
        m.apply(&live_quotes());
        m.save_at(&jst(4, 10, 0), Some(13_300.0), None).unwrap();
        m.apply(&RawQuotes::unavailable(FeedError::Timeout));
        assert_eq!(m.predict(Metal::Gold).unwrap().predicted, 0.0);
    }

    #[test]
    fn comparisons_skip_unavailable_markets() {
        let (m, _dir) = test_monitor();
        m.apply(&live_quotes());
        let rows = m.comparisons();
        assert_eq!(rows.len(), 4);

        let cn_plat = rows
            .iter()
            .find(|c| c.market == Market::Cn && c.metal == Metal::Platinum)
            .unwrap();
        assert!(cn_plat.spread.is_none());

        let cn_gold = rows
            .iter()
            .find(|c| c.market == Market::Cn && c.metal == Metal::Gold)
            .unwrap();
        // 560 CNY/g at 20 JPY/CNY = 11 200; reference 13 500.
        let s = cn_gold.spread.unwrap();
        assert_eq!(s.side, crate::ledger::SpreadSide::Premium);
        assert!((s.value - 2_300.0).abs() < 1e-6);
    }

    #[test]
    fn set_references_ignores_invalid_values() {
        let (m, _dir) = test_monitor();
        let r = m.set_references(Some(f64::NAN), Some(-3.0));
        assert_eq!(r, ReferencePrices { gold: 13_500.0, platinum: 4_600.0 });
        let r = m.set_references(Some(0.0), Some(4_700.0));
        assert_eq!(r, ReferencePrices { gold: 13_500.0, platinum: 4_700.0 });
    }

    #[test]
    fn save_without_live_price_records_nothing() {
        let (m, _dir) = test_monitor();
        let err = m.save_at(&jst(3, 9, 0), Some(13_500.0), Some(4_600.0)).unwrap_err();
        assert!(matches!(err, SaveError::NoLivePrice(Metal::Gold)));
        assert!(m.history().unwrap().is_empty());

        // A later live save must not inherit a reference-sized spread.
        m.apply(&live_quotes());
        let p = m.predict(Metal::Gold).unwrap();
        assert_eq!(p.latest_spread, 0);
        assert!((p.predicted - 13_000.0).abs() < 1e-6);
    }

    #[test]
    fn save_refused_when_platinum_is_down() {
        let (m, _dir) = test_monitor();
        m.apply(&RawQuotes {
            us_plat_usd_oz: Err(FeedError::Status(503)),
            ..live_quotes()
        });
        let err = m.save_at(&jst(3, 9, 0), None, None).unwrap_err();
        assert!(matches!(err, SaveError::NoLivePrice(Metal::Platinum)));
        assert!(m.history().unwrap().is_empty());
    }

    #[test]
    fn auto_record_waits_for_dollar_basis_prices() {
        let (m, _dir) = test_monitor();
        // Yuan gold alone is not enough: ledger spreads use the dollar basis.
        let snap = m.apply(&RawQuotes {
            us_gold_usd_oz: Err(FeedError::Timeout),
            ..live_quotes()
        });
        assert!(snap.cn_gold_per_gram > 0.0);
        assert!(m.auto_record().is_none());
        assert!(m.history().unwrap().is_empty());

        m.apply(&live_quotes());
        let e = m.auto_record().unwrap();
        assert_eq!(e.gold_spread, 500);
        assert_eq!(m.history().unwrap(), vec![e]);
    }

    #[tokio::test]
    async fn refresh_degrades_when_sources_are_unreachable() {
        let (m, _dir) = test_monitor();
        let snap = m.refresh().await;
        assert_eq!(snap.fx_rate, 0.0);
        assert_eq!(snap.us_gold_per_gram, 0.0);
        assert_eq!(snap.cn_plat_per_gram, 0.0);
        assert!(snap.issues.contains_key("fx_rate"));
        assert!(snap.issues.contains_key("us_gold"));
        assert!(m.comparisons().iter().all(|c| c.spread.is_none()));
    }
}
