 use std::collections::BTreeMap;
 use std::sync::Arc;
 use std::time::Duration;

 use anyhow::{Context, Result};
 use parking_lot::RwLock;
 use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
 use serde::{Deserialize, Serialize};
 use serde_json::Value as JsonValue;
 use thiserror::Error;

 use crate::{
     config::Settings,
     normalizer::{cross_rate, parse_price, sanitize, Metal, NormalizedPrice, Quote, QuoteSource},
     utils::now_ts,
 };

 const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
 const SINA_REFERER: &str = "https://finance.sina.com.cn/";

 /// Sina futures row fields.
 const SINA_LAST_TRADED: usize = 8;
 const SINA_PREV_SETTLEMENT: usize = 5;

 /// Shanghai gold and Guangzhou platinum main contracts.
 pub const CN_GOLD_CODE: &str = "nf_au0";
 pub const CN_PLAT_CODE: &str = "nf_pt0";

 #[derive(Debug, Clone, PartialEq, Error)]
 pub enum FeedError {
     #[error("request failed: {0}")]
     Http(String),
     #[error("timed out")]
     Timeout,
     #[error("http status {0}")]
     Status(u16),
     #[error("missing field {0}")]
     MissingField(String),
     #[error("non-numeric value at {0}")]
     NonNumeric(String),
     #[error("malformed payload: {0}")]
     Malformed(String),
     #[error("source disabled")]
     Disabled,
 }

 impl From<reqwest::Error> for FeedError {
     fn from(e: reqwest::Error) -> Self {
         if e.is_timeout() {
             FeedError::Timeout
         } else if let Some(status) = e.status() {
             FeedError::Status(status.as_u16())
         } else if e.is_decode() {
             FeedError::Malformed(e.to_string())
         } else {
             FeedError::Http(e.to_string())
         }
     }
 }

 pub type FetchResult = std::result::Result<f64, FeedError>;

 #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
 #[serde(rename_all = "lowercase")]
 pub enum Market {
     /// Dollar-denominated quotes (USD per troy ounce).
     Us,
     /// Yuan-denominated exchange futures (CNY per gram).
     Cn,
 }

 impl Market {
     pub const ALL: [Market; 2] = [Market::Us, Market::Cn];
 }

 /// Outcome of every fetch in one refresh cycle, before degradation to zero.
 #[derive(Debug, Clone)]
 pub struct RawQuotes {
     pub domestic_per_usd: FetchResult,
     pub cny_per_usd: FetchResult,
     pub us_gold_usd_oz: FetchResult,
     pub us_plat_usd_oz: FetchResult,
     pub cn_gold_cny_g: FetchResult,
     pub cn_plat_cny_g: FetchResult,
 }

 impl RawQuotes {
     pub fn unavailable(err: FeedError) -> Self {
         Self {
             domestic_per_usd: Err(err.clone()),
             cny_per_usd: Err(err.clone()),
             us_gold_usd_oz: Err(err.clone()),
             us_plat_usd_oz: Err(err.clone()),
             cn_gold_cny_g: Err(err.clone()),
             cn_plat_cny_g: Err(err),
         }
     }
 }

 /// Normalised view of one refresh cycle. Zero means unavailable.
 #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
 pub struct MarketSnapshot {
     pub ts: f64,
     /// Domestic currency per USD.
     pub fx_rate: f64,
     /// Domestic currency per CNY.
     pub cny_rate: f64,
     pub us_gold_usd_oz: f64,
     pub us_plat_usd_oz: f64,
     pub cn_gold_cny_g: f64,
     pub cn_plat_cny_g: f64,
     pub us_gold_per_gram: f64,
     pub us_plat_per_gram: f64,
     pub cn_gold_per_gram: f64,
     pub cn_plat_per_gram: f64,
     /// Field name -> reason it is unavailable this cycle.
     pub issues: BTreeMap<String, String>,
 }

 impl MarketSnapshot {
     pub fn from_raw(raw: &RawQuotes, ts: f64) -> Self {
         let mut issues = BTreeMap::new();
         let mut take = |name: &str, r: &FetchResult| -> f64 {
             match r {
                 Ok(v) if sanitize(*v) > 0.0 => *v,
                 Ok(v) => {
                     issues.insert(name.to_string(), format!("non-positive value {v}"));
                     0.0
                 }
                 Err(e) => {
                     issues.insert(name.to_string(), e.to_string());
                     0.0
                 }
             }
         };

         let fx_rate = Quote::new(QuoteSource::FxRate, take("fx_rate", &raw.domestic_per_usd)).value;
         let cny_per_usd = take("cny_per_usd", &raw.cny_per_usd);
         let us_gold = Quote::new(QuoteSource::MetalUsdPerOz, take("us_gold", &raw.us_gold_usd_oz));
         let us_plat = Quote::new(QuoteSource::MetalUsdPerOz, take("us_plat", &raw.us_plat_usd_oz));
         // Futures rows arrive already reduced to one CNY/g price.
         let cn_gold = Quote::new(QuoteSource::MetalCnyPerGram, take("cn_gold", &raw.cn_gold_cny_g));
         let cn_plat = Quote::new(QuoteSource::MetalCnyPerGram, take("cn_plat", &raw.cn_plat_cny_g));
         let cny_rate = cross_rate(fx_rate, cny_per_usd);

         Self {
             ts,
             fx_rate,
             cny_rate,
             us_gold_usd_oz: us_gold.value,
             us_plat_usd_oz: us_plat.value,
             cn_gold_cny_g: cn_gold.value,
             cn_plat_cny_g: cn_plat.value,
             us_gold_per_gram: us_gold.per_gram(fx_rate),
             us_plat_per_gram: us_plat.per_gram(fx_rate),
             cn_gold_per_gram: cn_gold.per_gram(cny_rate),
             cn_plat_per_gram: cn_plat.per_gram(cny_rate),
             issues,
         }
     }

     pub fn price_per_gram(&self, market: Market, metal: Metal) -> f64 {
         match (market, metal) {
             (Market::Us, Metal::Gold) => self.us_gold_per_gram,
             (Market::Us, Metal::Platinum) => self.us_plat_per_gram,
             (Market::Cn, Metal::Gold) => self.cn_gold_per_gram,
             (Market::Cn, Metal::Platinum) => self.cn_plat_per_gram,
         }
     }

     pub fn normalized(&self, market: Market, metal: Metal) -> NormalizedPrice {
         NormalizedPrice {
             metal,
             price_per_gram: self.price_per_gram(market, metal),
         }
     }

     /// Native quote as received (USD/oz or CNY/g).
     pub fn raw_quote(&self, market: Market, metal: Metal) -> f64 {
         match (market, metal) {
             (Market::Us, Metal::Gold) => self.us_gold_usd_oz,
             (Market::Us, Metal::Platinum) => self.us_plat_usd_oz,
             (Market::Cn, Metal::Gold) => self.cn_gold_cny_g,
             (Market::Cn, Metal::Platinum) => self.cn_plat_cny_g,
         }
     }
 }

 /// Latest snapshot shared between the poller and readers. Writers replace the
 /// whole value, so readers never observe a half-updated snapshot.
 #[derive(Clone, Default)]
 pub struct FeedState {
     inner: Arc<RwLock<Option<Arc<MarketSnapshot>>>>,
 }

 impl FeedState {
     pub fn new() -> Self {
         Self::default()
     }

     pub fn publish(&self, snapshot: MarketSnapshot) -> Arc<MarketSnapshot> {
         let snapshot = Arc::new(snapshot);
         *self.inner.write() = Some(snapshot.clone());
         snapshot
     }

     pub fn latest(&self) -> Option<Arc<MarketSnapshot>> {
         self.inner.read().clone()
     }
 }

 /// HTTP client for the upstream quote sources.
 #[derive(Clone)]
 pub struct FeedHandler {
     client: reqwest::Client,
     fx_url: String,
     gold_url: String,
     plat_url: String,
     cn_url: String,
     cn_enabled: bool,
     domestic_ccy: String,
 }

 impl FeedHandler {
     pub fn new(settings: &Settings) -> Result<Self> {
         let mut headers = HeaderMap::new();
         headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
         headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,ja;q=0.8"));
         let client = reqwest::Client::builder()
             .default_headers(headers)
             .timeout(Duration::from_millis(settings.fetch_timeout_ms))
             .build()
             .context("build http client")?;

         Ok(Self {
             client,
             fx_url: settings.fx_url.clone(),
             gold_url: settings.gold_url.clone(),
             plat_url: settings.plat_url.clone(),
             cn_url: settings.cn_url.clone(),
             cn_enabled: settings.cn_enabled,
             domestic_ccy: settings.domestic_ccy.clone(),
         })
     }

     /// Fetch every source concurrently. Never fails: each field carries its own outcome.
     pub async fn fetch_all(&self) -> RawQuotes {
         let (fx, us_gold, us_plat, cn) = tokio::join!(
             self.fetch_fx(),
             self.fetch_json_number(&self.gold_url, "/pax-gold/usd"),
             self.fetch_json_number(&self.plat_url, "/chart/result/0/meta/regularMarketPrice"),
             self.fetch_cn(),
         );
         let (domestic_per_usd, cny_per_usd) = fx;
         let (cn_gold_cny_g, cn_plat_cny_g) = cn;

         let raw = RawQuotes {
             domestic_per_usd,
             cny_per_usd,
             us_gold_usd_oz: us_gold,
             us_plat_usd_oz: us_plat,
             cn_gold_cny_g,
             cn_plat_cny_g,
         };
         log_outcomes(&raw);
         raw
     }

     async fn get_json(&self, url: &str) -> std::result::Result<JsonValue, FeedError> {
         let resp = self.client.get(url).send().await?.error_for_status()?;
         Ok(resp.json::<JsonValue>().await?)
     }

     async fn fetch_fx(&self) -> (FetchResult, FetchResult) {
         match self.get_json(&self.fx_url).await {
             Ok(body) => parse_fx(&body, &self.domestic_ccy),
             Err(e) => (Err(e.clone()), Err(e)),
         }
     }

     async fn fetch_json_number(&self, url: &str, pointer: &str) -> FetchResult {
         let body = self.get_json(url).await?;
         json_number(&body, pointer)
     }

     async fn fetch_cn(&self) -> (FetchResult, FetchResult) {
         if !self.cn_enabled {
             return (Err(FeedError::Disabled), Err(FeedError::Disabled));
         }
         let text = match self.get_sina_text().await {
             Ok(t) => t,
             Err(e) => return (Err(e.clone()), Err(e)),
         };
         (parse_sina(&text, CN_GOLD_CODE), parse_sina(&text, CN_PLAT_CODE))
     }

     async fn get_sina_text(&self) -> std::result::Result<String, FeedError> {
         let resp = self
             .client
             .get(&self.cn_url)
             .header(REFERER, SINA_REFERER)
             .send()
             .await?
             .error_for_status()?;
         // Payload is GBK; only the ASCII numeric fields are read, and GBK
         // trail bytes never collide with ',' or '"'.
         let bytes = resp.bytes().await?;
         Ok(String::from_utf8_lossy(&bytes).into_owned())
     }
 }

 fn log_outcomes(raw: &RawQuotes) {
     let fields = [
         ("fx", &raw.domestic_per_usd),
         ("cny", &raw.cny_per_usd),
         ("us_gold", &raw.us_gold_usd_oz),
         ("us_plat", &raw.us_plat_usd_oz),
         ("cn_gold", &raw.cn_gold_cny_g),
         ("cn_plat", &raw.cn_plat_cny_g),
     ];
     for (name, r) in fields {
         match r {
             Ok(v) => log::debug!("feed.{name}.ok value={v}"),
             Err(FeedError::Disabled) => {}
             Err(e) => log::warn!("feed.{name}.unavailable reason={e}"),
         }
     }
 }

 /// Number at a JSON pointer. Numeric strings are accepted.
 pub fn json_number(body: &JsonValue, pointer: &str) -> FetchResult {
     let v = body
         .pointer(pointer)
         .ok_or_else(|| FeedError::MissingField(pointer.to_string()))?;
     let n = match v {
         JsonValue::Number(n) => n.as_f64(),
         JsonValue::String(s) => s.trim().parse::<f64>().ok(),
         _ => None,
     };
     match n.map(sanitize) {
         Some(x) if x > 0.0 => Ok(x),
         _ => Err(FeedError::NonNumeric(pointer.to_string())),
     }
 }

 /// (domestic per USD, CNY per USD) from a USD-based rate mapping.
 pub fn parse_fx(body: &JsonValue, domestic_ccy: &str) -> (FetchResult, FetchResult) {
     (
         json_number(body, &format!("/rates/{}", domestic_ccy.to_uppercase())),
         json_number(body, "/rates/CNY"),
     )
 }

 /// Price in CNY/g for one `var hq_str_<code>="...";` row.
 pub fn parse_sina(text: &str, code: &str) -> FetchResult {
     let marker = format!("var hq_str_{code}=\"");
     let start = text
         .find(&marker)
         .map(|i| i + marker.len())
         .ok_or_else(|| FeedError::MissingField(code.to_string()))?;
     let rest = &text[start..];
     let body = rest.split('"').next().unwrap_or_default();
     let parts: Vec<&str> = body.split(',').collect();
     if parts.len() <= SINA_LAST_TRADED {
         return Err(FeedError::Malformed(format!("{code}: {} fields", parts.len())));
     }
     let quote = Quote::futures(
         parse_price(parts[SINA_LAST_TRADED]),
         parse_price(parts[SINA_PREV_SETTLEMENT]),
     );
     if quote.value > 0.0 {
         Ok(quote.value)
     } else {
         Err(FeedError::NonNumeric(code.to_string()))
     }
 }

 /// Snapshot with nothing available, used before the first refresh completes.
 pub fn empty_snapshot() -> MarketSnapshot {
     MarketSnapshot::from_raw(&RawQuotes::unavailable(FeedError::Http("not fetched yet".into())), now_ts())
 }
