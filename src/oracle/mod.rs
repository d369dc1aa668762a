pub mod client;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::db::price_repo::{self, PricePoint};
use crate::errors::SourceError;

use client::PriceApiClient;

#[derive(Debug, Clone, Copy)]
struct CachedSpot {
    price: Decimal,
    fetched_at: Instant,
}

/// Spot and historical USD prices by asset symbol.
///
/// Spot reads go through a TTL cache in front of the upstream. Historical
/// reads go through the `price_history` table so backtests replay against
/// the exact prices the system saw, interpolating linearly between the
/// surrounding points when the exact timestamp is absent. An asset the
/// upstream doesn't know yields `None` — callers persist the trade without a
/// USD value rather than fabricating one.
pub struct PriceOracle {
    client: PriceApiClient,
    pool: PgPool,
    cache: RwLock<HashMap<String, CachedSpot>>,
    ttl: Duration,
}

impl PriceOracle {
    pub fn new(base_url: &str, pool: PgPool, ttl: Duration) -> Self {
        Self {
            client: PriceApiClient::new(base_url),
            pool,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Current USD price for one asset.
    pub async fn spot(&self, asset: &str) -> Result<Option<Decimal>, SourceError> {
        let map = self.spot_many(&[asset.to_string()]).await?;
        Ok(map.get(&asset.to_uppercase()).copied())
    }

    /// Current USD prices for a batch of assets. Cached entries within TTL
    /// are served without touching the upstream; the remainder is fetched in
    /// one call.
    pub async fn spot_many(
        &self,
        assets: &[String],
    ) -> Result<HashMap<String, Decimal>, SourceError> {
        let mut out = HashMap::new();
        let mut missing: Vec<String> = Vec::new();

        {
            let cache = self.cache.read().await;
            for asset in assets {
                let key = asset.to_uppercase();
                match cache.get(&key) {
                    Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                        out.insert(key, entry.price);
                    }
                    _ => missing.push(key),
                }
            }
        }

        if missing.is_empty() {
            return Ok(out);
        }

        let fetched = self.client.spot_prices(&missing).await?;

        let mut cache = self.cache.write().await;
        let now = Instant::now();
        for (symbol, price) in &fetched {
            cache.insert(
                symbol.clone(),
                CachedSpot {
                    price: *price,
                    fetched_at: now,
                },
            );
            out.insert(symbol.clone(), *price);
        }

        Ok(out)
    }

    /// USD price at a historical timestamp. Interpolates linearly between
    /// the surrounding persisted points; on a complete miss, fetches a
    /// ±1 day window from the upstream, persists it, and retries once.
    pub async fn historical(
        &self,
        asset: &str,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<Option<Decimal>> {
        if let Some(price) = self.historical_from_store(asset, ts).await? {
            return Ok(Some(price));
        }

        let from = ts - ChronoDuration::days(1);
        let to = ts + ChronoDuration::days(1);
        match self.client.price_range(asset, from, to).await {
            Ok(points) if !points.is_empty() => {
                price_repo::bulk_upsert_prices(&self.pool, asset, &points).await?;
            }
            Ok(_) => return Ok(None),
            Err(e) => {
                tracing::debug!(asset = %asset, error = %e, "Historical price fetch failed");
                return Ok(None);
            }
        }

        self.historical_from_store(asset, ts).await
    }

    async fn historical_from_store(
        &self,
        asset: &str,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<Option<Decimal>> {
        let (before, after) = price_repo::surrounding_points(&self.pool, asset, ts).await?;
        Ok(interpolate(before, after, ts))
    }

    /// Ordered price series within `[from, to]`. Fills the range from the
    /// upstream when the store has nothing for it.
    pub async fn series(
        &self,
        asset: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PricePoint>> {
        let stored = price_repo::series(&self.pool, asset, from, to).await?;
        if !stored.is_empty() {
            return Ok(stored);
        }

        match self.client.price_range(asset, from, to).await {
            Ok(points) if !points.is_empty() => {
                price_repo::bulk_upsert_prices(&self.pool, asset, &points).await?;
                price_repo::series(&self.pool, asset, from, to).await
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) => {
                tracing::debug!(asset = %asset, error = %e, "Price series fetch failed");
                Ok(Vec::new())
            }
        }
    }

    /// Scheduler entry point: refresh spot prices for the tracked assets and
    /// persist them as history points.
    pub async fn refresh_spot(&self, assets: &[String]) -> anyhow::Result<usize> {
        let prices = self
            .spot_many(assets)
            .await
            .map_err(|e| anyhow::anyhow!("spot refresh failed: {e}"))?;

        let now = Utc::now();
        for (symbol, price) in &prices {
            price_repo::bulk_upsert_prices(&self.pool, symbol, &[(now, *price)]).await?;
        }

        Ok(prices.len())
    }
}

/// Linear interpolation between two known points. Exact hits and one-sided
/// misses degrade to the nearest known price.
fn interpolate(
    before: Option<PricePoint>,
    after: Option<PricePoint>,
    ts: DateTime<Utc>,
) -> Option<Decimal> {
    match (before, after) {
        (Some((t0, p0)), Some((t1, p1))) => {
            if t0 == t1 {
                return Some(p0);
            }
            let span = (t1 - t0).num_seconds();
            let offset = (ts - t0).num_seconds();
            if span <= 0 {
                return Some(p0);
            }
            let fraction = Decimal::from(offset) / Decimal::from(span);
            Some(p0 + (p1 - p0) * fraction)
        }
        (Some((_, p)), None) | (None, Some((_, p))) => Some(p),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn interpolates_between_points() {
        let before = Some((ts(10, 0), dec!(100)));
        let after = Some((ts(12, 0), dec!(200)));

        let mid = interpolate(before, after, ts(11, 0)).unwrap();
        assert_eq!(mid, dec!(150));

        let quarter = interpolate(before, after, ts(10, 30)).unwrap();
        assert_eq!(quarter, dec!(125));
    }

    #[test]
    fn exact_hit_returns_known_price() {
        let point = Some((ts(10, 0), dec!(42)));
        assert_eq!(interpolate(point, point, ts(10, 0)), Some(dec!(42)));
    }

    #[test]
    fn one_sided_miss_uses_nearest() {
        let before = Some((ts(10, 0), dec!(99)));
        assert_eq!(interpolate(before, None, ts(18, 0)), Some(dec!(99)));

        let after = Some((ts(20, 0), dec!(101)));
        assert_eq!(interpolate(None, after, ts(18, 0)), Some(dec!(101)));
    }

    #[test]
    fn unknown_asset_yields_none() {
        assert_eq!(interpolate(None, None, ts(10, 0)), None);
    }
}
