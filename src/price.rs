//! Dynamic electricity pricing for Helion
//!
//! This module fetches a multi-day hourly price forecast from the Tibber
//! GraphQL API, normalizes all monetary values to minor currency units on
//! ingestion, and exposes the derived signals the decision engine consumes:
//! average price, cheapest hours, and "is this price acceptable".
//!
//! The provider owns its cache. A failed fetch always retains the previous
//! cache; persistence of the cache to the durable store is best-effort.

use crate::config::PriceConfig;
use crate::error::{HelionError, Result};
use crate::logging::get_logger;
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Discrete tariff band supplied by the pricing source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    Normal,
    Expensive,
    VeryExpensive,
}

impl PriceLevel {
    /// Map an API label onto a level; unknown labels become `Normal`
    pub fn from_label(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "VERY_CHEAP" => Self::VeryCheap,
            "CHEAP" => Self::Cheap,
            "EXPENSIVE" => Self::Expensive,
            "VERY_EXPENSIVE" => Self::VeryExpensive,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryCheap => "VERY_CHEAP",
            Self::Cheap => "CHEAP",
            Self::Normal => "NORMAL",
            Self::Expensive => "EXPENSIVE",
            Self::VeryExpensive => "VERY_EXPENSIVE",
        }
    }
}

/// One hour of price data, monetary fields in minor units (hundredths)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub total: i64,
    pub energy: i64,
    pub tax: i64,
    pub level: PriceLevel,
    pub starts_at: DateTime<Utc>,
    pub currency: String,
}

/// Price data exactly as the external API reports it, in major units
#[derive(Debug, Clone)]
pub struct RawPricePoint {
    pub total: f64,
    pub energy: f64,
    pub tax: f64,
    pub level: PriceLevel,
    pub starts_at: DateTime<Utc>,
    pub currency: String,
}

/// Convert a major-unit amount to integer hundredths
fn to_minor_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

impl RawPricePoint {
    fn into_minor(self) -> PricePoint {
        PricePoint {
            total: to_minor_units(self.total),
            energy: to_minor_units(self.energy),
            tax: to_minor_units(self.tax),
            level: self.level,
            starts_at: self.starts_at,
            currency: self.currency,
        }
    }
}

/// A complete fetch result from the pricing source
#[derive(Debug, Clone, Default)]
pub struct PriceInfo {
    pub current: Option<RawPricePoint>,
    pub forecast: Vec<RawPricePoint>,
}

/// Cached current price and forecast.
///
/// The forecast is strictly ordered ascending by `starts_at` with no
/// duplicate timestamps; the cache is rebuilt wholesale on each
/// successful fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceCache {
    pub current: Option<PricePoint>,
    pub forecast: Vec<PricePoint>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PriceCache {
    /// Build a cache from fetched data, enforcing forecast ordering
    fn build(info: PriceInfo, fetched_at: DateTime<Utc>) -> Self {
        let current = info.current.map(RawPricePoint::into_minor);
        let mut forecast: Vec<PricePoint> =
            info.forecast.into_iter().map(RawPricePoint::into_minor).collect();
        forecast.sort_by_key(|p| p.starts_at);
        forecast.dedup_by_key(|p| p.starts_at);
        Self {
            current,
            forecast,
            fetched_at: Some(fetched_at),
        }
    }
}

/// Capability to fetch price data from an external source
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, config: &PriceConfig) -> Result<PriceInfo>;
}

/// Price provider fronting the external API with a persistent cache
pub struct PriceProvider {
    source: Arc<dyn PriceSource>,
    store: Option<Arc<dyn Store>>,
    cache: PriceCache,
    refresh_in_flight: AtomicBool,
    logger: crate::logging::StructuredLogger,
}

/// Store key for the persisted cache document
const CACHE_KEY: &str = "price_cache";

impl PriceProvider {
    /// Create a new provider over an injected source and optional store
    pub fn new(source: Arc<dyn PriceSource>, store: Option<Arc<dyn Store>>) -> Self {
        Self {
            source,
            store,
            cache: PriceCache::default(),
            refresh_in_flight: AtomicBool::new(false),
            logger: get_logger("price"),
        }
    }

    /// Restore the persisted cache, best-effort. Absence is not fatal.
    pub async fn initialize(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        match store.get(CACHE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<PriceCache>(value) {
                Ok(cache) => {
                    self.logger.info(&format!(
                        "Restored price cache with {} forecast entries",
                        cache.forecast.len()
                    ));
                    self.cache = cache;
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Persisted price cache unreadable: {}", e)),
            },
            Ok(None) => self.logger.info("No persisted price cache found"),
            Err(e) => self
                .logger
                .warn(&format!("Price cache restore failed: {}", e)),
        }
    }

    /// Fetch current and forecast prices and rebuild the cache.
    ///
    /// On any failure the previous cache is retained unchanged and the
    /// classified error is returned. A refresh already in flight
    /// short-circuits this request instead of interleaving cache writes.
    pub async fn refresh(&mut self, config: &PriceConfig) -> Result<()> {
        if !config.enabled {
            return Err(HelionError::config("Price provider is disabled"));
        }
        if config.access_token.trim().is_empty() {
            return Err(HelionError::config("No pricing API access token configured"));
        }

        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            self.logger.debug("Refresh already in flight, coalescing");
            return Ok(());
        }

        let result = self.source.fetch(config).await;
        self.refresh_in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(info) => {
                self.cache = PriceCache::build(info, Utc::now());
                self.logger.info(&format!(
                    "Price cache refreshed: {} forecast entries",
                    self.cache.forecast.len()
                ));
                self.persist_cache().await;
                Ok(())
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Price refresh failed, cache retained: {}", e));
                Err(e)
            }
        }
    }

    /// Write the cache to the durable store; a store failure is logged
    /// once per attempt and never blocks in-memory operation.
    async fn persist_cache(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match serde_json::to_value(&self.cache) {
            Ok(value) => {
                if let Err(e) = store.put(CACHE_KEY, &value).await {
                    self.logger
                        .warn(&format!("Price cache persist failed: {}", e));
                }
            }
            Err(e) => self
                .logger
                .warn(&format!("Price cache serialization failed: {}", e)),
        }
    }

    /// Read-only view of the cache
    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Current hour's price point, if known
    pub fn current_price(&self) -> Option<&PricePoint> {
        self.cache.current.as_ref()
    }

    /// Mean `total` over the next `hours` forecast entries strictly
    /// after `now`, in minor units. `None` when no future entries exist.
    pub fn average_price(&self, hours: usize, now: DateTime<Utc>) -> Option<f64> {
        let future: Vec<i64> = self
            .cache
            .forecast
            .iter()
            .filter(|p| p.starts_at > now)
            .take(hours)
            .map(|p| p.total)
            .collect();
        if future.is_empty() {
            return None;
        }
        Some(future.iter().sum::<i64>() as f64 / future.len() as f64)
    }

    /// Cheapest `count` future entries within `horizon_hours` of `now`,
    /// sorted ascending by `total` (ties broken by earliest `starts_at`).
    pub fn cheapest_hours(
        &self,
        count: usize,
        horizon_hours: i64,
        now: DateTime<Utc>,
    ) -> Vec<PricePoint> {
        let horizon_end = now + chrono::Duration::hours(horizon_hours);
        let mut candidates: Vec<PricePoint> = self
            .cache
            .forecast
            .iter()
            .filter(|p| p.starts_at > now && p.starts_at <= horizon_end)
            .cloned()
            .collect();
        // Forecast is time-ordered, so a stable sort on total keeps the
        // earliest starts_at first among equal totals
        candidates.sort_by_key(|p| p.total);
        candidates.truncate(count);
        candidates
    }

    /// Whether a price point is acceptable for grid charging.
    ///
    /// Level membership when configured, otherwise below-average,
    /// otherwise under the absolute threshold. With no signal at all the
    /// answer is `false`: never assume a good price.
    pub fn is_price_good(
        &self,
        point: &PricePoint,
        config: &PriceConfig,
        now: DateTime<Utc>,
    ) -> bool {
        if config.use_price_levels {
            return config.allowed_price_levels.contains(&point.level);
        }
        if let Some(average) = self.average_price(24, now) {
            return (point.total as f64) < average;
        }
        if let Some(threshold) = config.max_price_threshold {
            return point.total <= threshold;
        }
        false
    }
}

/// Tibber GraphQL price source
pub struct TibberApi {
    client: reqwest::Client,
    logger: crate::logging::StructuredLogger,
}

const TIBBER_URL: &str = "https://api.tibber.com/v1-beta/gql";

const PRICE_QUERY: &str = r#"
query PriceInfoQuery {
    viewer {
        homes {
            id
            currentSubscription {
                priceInfo {
                    current { total energy tax level startsAt currency }
                    today { total energy tax level startsAt currency }
                    tomorrow { total energy tax level startsAt currency }
                }
            }
        }
    }
}
"#;

impl TibberApi {
    /// Create a new API client with a bounded request timeout
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            logger: get_logger("tibber"),
        })
    }

    fn parse_point(entry: &serde_json::Value) -> Option<RawPricePoint> {
        let starts_at = entry
            .get("startsAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        Some(RawPricePoint {
            total: entry.get("total").and_then(|v| v.as_f64()).unwrap_or(0.0),
            energy: entry.get("energy").and_then(|v| v.as_f64()).unwrap_or(0.0),
            tax: entry.get("tax").and_then(|v| v.as_f64()).unwrap_or(0.0),
            level: PriceLevel::from_label(
                entry.get("level").and_then(|v| v.as_str()).unwrap_or("NORMAL"),
            ),
            starts_at,
            currency: entry
                .get("currency")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for TibberApi {
    async fn fetch(&self, config: &PriceConfig) -> Result<PriceInfo> {
        use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
        use serde_json::json;

        let resp = self
            .client
            .post(TIBBER_URL)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", config.access_token.trim()),
            )
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&json!({"query": PRICE_QUERY, "variables": {} }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(HelionError::auth(format!(
                "Pricing API rejected credentials: {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(HelionError::network(format!("Pricing API error: {}", status)));
        }

        let body: serde_json::Value = resp.json().await?;
        if let Some(errors) = body.get("errors") {
            let msg = errors[0]["message"].as_str().unwrap_or("GraphQL error");
            if msg.to_lowercase().contains("auth") {
                return Err(HelionError::auth(msg.to_string()));
            }
            return Err(HelionError::network(format!("Pricing API error: {}", msg)));
        }

        let homes = body
            .get("data")
            .and_then(|d| d.get("viewer"))
            .and_then(|v| v.get("homes"))
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default();

        if homes.is_empty() {
            self.logger.warn("No homes in pricing account");
            return Err(HelionError::config("Pricing account has no homes"));
        }

        // Configured home id, or the first home found if unset
        let target_home = if config.home_id.is_empty() {
            homes.first().cloned()
        } else {
            homes
                .iter()
                .find(|h| h.get("id").and_then(|x| x.as_str()) == Some(config.home_id.as_str()))
                .cloned()
                .or_else(|| homes.first().cloned())
        };

        let Some(home) = target_home else {
            return Err(HelionError::config("No usable home in pricing account"));
        };

        let price_info = home
            .get("currentSubscription")
            .and_then(|c| c.get("priceInfo"))
            .cloned()
            .unwrap_or_default();

        let current = price_info.get("current").and_then(Self::parse_point);

        let mut forecast = Vec::new();
        for key in ["today", "tomorrow"] {
            if let Some(arr) = price_info.get(key).and_then(|v| v.as_array()) {
                forecast.extend(arr.iter().filter_map(Self::parse_point));
            }
        }

        Ok(PriceInfo { current, forecast })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    fn raw(hour: u32, total: f64, level: PriceLevel) -> RawPricePoint {
        RawPricePoint {
            total,
            energy: total * 0.8,
            tax: total * 0.2,
            level,
            starts_at: ts(hour),
            currency: "NOK".to_string(),
        }
    }

    struct FixedSource {
        info: PriceInfo,
    }

    #[async_trait]
    impl PriceSource for FixedSource {
        async fn fetch(&self, _config: &PriceConfig) -> Result<PriceInfo> {
            Ok(self.info.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PriceSource for FailingSource {
        async fn fetch(&self, _config: &PriceConfig) -> Result<PriceInfo> {
            Err(HelionError::network("unreachable"))
        }
    }

    fn enabled_config() -> PriceConfig {
        PriceConfig {
            enabled: true,
            access_token: "token".to_string(),
            ..PriceConfig::default()
        }
    }

    fn provider_with(points: Vec<RawPricePoint>) -> PriceProvider {
        let source = Arc::new(FixedSource {
            info: PriceInfo {
                current: None,
                forecast: points,
            },
        });
        PriceProvider::new(source, None)
    }

    #[test]
    fn minor_unit_conversion_rounds() {
        assert_eq!(to_minor_units(0.154), 15);
        assert_eq!(to_minor_units(0.155), 16);
        assert_eq!(to_minor_units(1.0), 100);
        assert_eq!(to_minor_units(0.0), 0);
    }

    #[test]
    fn price_level_label_roundtrip() {
        assert_eq!(PriceLevel::from_label("VERY_CHEAP"), PriceLevel::VeryCheap);
        assert_eq!(PriceLevel::from_label("cheap"), PriceLevel::Cheap);
        assert_eq!(PriceLevel::from_label("bogus"), PriceLevel::Normal);
        assert_eq!(PriceLevel::VeryExpensive.as_str(), "VERY_EXPENSIVE");
    }

    #[tokio::test]
    async fn refresh_builds_ordered_deduped_forecast() {
        let mut provider = provider_with(vec![
            raw(12, 0.30, PriceLevel::Normal),
            raw(10, 0.20, PriceLevel::Cheap),
            raw(10, 0.20, PriceLevel::Cheap), // duplicate hour
            raw(11, 0.25, PriceLevel::Normal),
        ]);
        provider.refresh(&enabled_config()).await.unwrap();

        let forecast = &provider.cache().forecast;
        assert_eq!(forecast.len(), 3);
        assert!(forecast.windows(2).all(|w| w[0].starts_at < w[1].starts_at));
        assert_eq!(forecast[0].total, 20);
    }

    #[tokio::test]
    async fn refresh_failure_retains_previous_cache() {
        let mut provider = provider_with(vec![raw(10, 0.20, PriceLevel::Cheap)]);
        provider.refresh(&enabled_config()).await.unwrap();
        assert_eq!(provider.cache().forecast.len(), 1);

        provider.source = Arc::new(FailingSource);
        let err = provider.refresh(&enabled_config()).await.unwrap_err();
        assert!(matches!(err, HelionError::Network { .. }));
        assert_eq!(provider.cache().forecast.len(), 1);
    }

    #[tokio::test]
    async fn refresh_rejects_disabled_and_missing_token() {
        let mut provider = provider_with(vec![]);

        let mut cfg = enabled_config();
        cfg.enabled = false;
        assert!(matches!(
            provider.refresh(&cfg).await.unwrap_err(),
            HelionError::Config { .. }
        ));

        let mut cfg = enabled_config();
        cfg.access_token = String::new();
        assert!(matches!(
            provider.refresh(&cfg).await.unwrap_err(),
            HelionError::Config { .. }
        ));
    }

    #[tokio::test]
    async fn average_price_over_future_entries_only() {
        let mut provider = provider_with(vec![
            raw(8, 0.10, PriceLevel::Cheap), // in the past relative to now
            raw(10, 0.20, PriceLevel::Cheap),
            raw(11, 0.40, PriceLevel::Expensive),
        ]);
        provider.refresh(&enabled_config()).await.unwrap();

        let now = ts(9);
        let avg = provider.average_price(24, now).unwrap();
        assert!((avg - 30.0).abs() < 1e-9);

        // No future entries at all
        assert!(provider.average_price(24, ts(23)).is_none());
    }

    #[tokio::test]
    async fn cheapest_hours_sorted_within_horizon() {
        let mut provider = provider_with(vec![
            raw(10, 0.40, PriceLevel::Expensive),
            raw(11, 0.10, PriceLevel::VeryCheap),
            raw(12, 0.20, PriceLevel::Cheap),
            raw(20, 0.05, PriceLevel::VeryCheap), // outside horizon
        ]);
        provider.refresh(&enabled_config()).await.unwrap();

        let now = ts(9);
        let cheapest = provider.cheapest_hours(2, 6, now);
        assert_eq!(cheapest.len(), 2);
        assert_eq!(cheapest[0].starts_at, ts(11));
        assert_eq!(cheapest[1].starts_at, ts(12));
        assert!(cheapest.iter().all(|p| p.starts_at > now));
    }

    #[tokio::test]
    async fn cheapest_hours_ties_break_by_earliest_start() {
        let mut provider = provider_with(vec![
            raw(12, 0.20, PriceLevel::Cheap),
            raw(10, 0.20, PriceLevel::Cheap),
            raw(11, 0.20, PriceLevel::Cheap),
        ]);
        provider.refresh(&enabled_config()).await.unwrap();

        let cheapest = provider.cheapest_hours(2, 24, ts(9));
        assert_eq!(cheapest[0].starts_at, ts(10));
        assert_eq!(cheapest[1].starts_at, ts(11));
    }

    #[tokio::test]
    async fn is_price_good_level_membership_ignores_numeric_price() {
        let mut provider = provider_with(vec![raw(10, 0.01, PriceLevel::Expensive)]);
        provider.refresh(&enabled_config()).await.unwrap();

        let mut cfg = enabled_config();
        cfg.use_price_levels = true;
        cfg.allowed_price_levels = vec![PriceLevel::VeryCheap, PriceLevel::Cheap];

        // Absurdly cheap numeric price, but level not in the allowed set
        let expensive_but_cheap = raw(13, 0.0001, PriceLevel::Expensive).into_minor();
        assert!(!provider.is_price_good(&expensive_but_cheap, &cfg, ts(9)));

        let cheap = raw(14, 99.0, PriceLevel::Cheap).into_minor();
        assert!(provider.is_price_good(&cheap, &cfg, ts(9)));
    }

    #[tokio::test]
    async fn is_price_good_falls_back_to_average_then_threshold() {
        let mut provider = provider_with(vec![
            raw(10, 0.20, PriceLevel::Normal),
            raw(11, 0.40, PriceLevel::Normal),
        ]);
        provider.refresh(&enabled_config()).await.unwrap();

        let cfg = enabled_config();
        let now = ts(9);

        // Average is 30 minor units; 25 is below it
        let below = raw(12, 0.25, PriceLevel::Normal).into_minor();
        assert!(provider.is_price_good(&below, &cfg, now));
        let above = raw(12, 0.35, PriceLevel::Normal).into_minor();
        assert!(!provider.is_price_good(&above, &cfg, now));

        // No future entries -> average unavailable -> threshold applies
        let mut cfg_thr = enabled_config();
        cfg_thr.max_price_threshold = Some(30);
        let point = raw(12, 0.30, PriceLevel::Normal).into_minor();
        assert!(provider.is_price_good(&point, &cfg_thr, ts(23)));
        let point = raw(12, 0.31, PriceLevel::Normal).into_minor();
        assert!(!provider.is_price_good(&point, &cfg_thr, ts(23)));
    }

    #[tokio::test]
    async fn is_price_good_conservative_default() {
        let provider = provider_with(vec![]);
        let cfg = enabled_config();
        let point = raw(12, 0.0, PriceLevel::VeryCheap).into_minor();
        // No levels, no average, no threshold: never assume a good price
        assert!(!provider.is_price_good(&point, &cfg, ts(9)));
    }
}
