use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::db::{metrics_repo, trade_repo, whale_repo};
use crate::models::WhaleType;

#[derive(Debug, Clone, Copy)]
pub struct ClassifierThresholds {
    /// Trades in the trailing 30 days at or above which a wallet trades
    /// actively.
    pub freq_hi: i64,
    /// 30-day volume as a multiple of portfolio value at or above which the
    /// wallet is churning its whole book.
    pub volume_ratio_hi: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            freq_hi: 10,
            volume_ratio_hi: 1.0,
        }
    }
}

/// Classify a wallet from its trailing-30d activity.
///
/// Active frequency plus volume turning over the whole portfolio marks a
/// `holder_trader`; active frequency alone a `trader`; everything else a
/// `holder`.
pub fn classify(
    trades_30d: i64,
    volume_30d_usd: Decimal,
    portfolio_value_usd: Option<Decimal>,
    thresholds: &ClassifierThresholds,
) -> WhaleType {
    let frequent = trades_30d >= thresholds.freq_hi;
    if !frequent {
        return WhaleType::Holder;
    }

    let churns = portfolio_value_usd
        .filter(|v| *v > Decimal::ZERO)
        .and_then(|v| (volume_30d_usd / v).to_f64())
        .map(|ratio| ratio >= thresholds.volume_ratio_hi)
        .unwrap_or(false);

    if churns {
        WhaleType::HolderTrader
    } else {
        WhaleType::Trader
    }
}

/// Scheduler entry point: reclassify every tracked whale.
pub async fn run_classifier(
    pool: &PgPool,
    thresholds: &ClassifierThresholds,
) -> anyhow::Result<usize> {
    let whales = whale_repo::list_all_whales(pool).await?;
    let window_start = Utc::now() - Duration::days(30);
    let mut changed = 0usize;

    for whale in &whales {
        let (volume_30d, trades_30d) =
            trade_repo::volume_and_count_since(pool, whale.id, window_start).await?;
        let portfolio_value = metrics_repo::get_current(pool, whale.id)
            .await?
            .and_then(|m| m.portfolio_value_usd);

        let new_type = classify(trades_30d, volume_30d, portfolio_value, thresholds);
        if whale.whale_type.as_deref() != Some(new_type.as_str()) {
            whale_repo::set_whale_type(pool, whale.id, new_type.as_str()).await?;
            changed += 1;
            tracing::info!(
                address = %whale.address,
                whale_type = %new_type,
                "Whale reclassified"
            );
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn infrequent_wallet_is_holder() {
        let t = ClassifierThresholds::default();
        assert_eq!(classify(3, dec!(1000000), Some(dec!(500000)), &t), WhaleType::Holder);
    }

    #[test]
    fn frequent_wallet_is_trader() {
        let t = ClassifierThresholds::default();
        // 20 trades but volume well below portfolio turnover
        assert_eq!(
            classify(20, dec!(50000), Some(dec!(1000000)), &t),
            WhaleType::Trader
        );
    }

    #[test]
    fn frequent_churning_wallet_is_holder_trader() {
        let t = ClassifierThresholds::default();
        assert_eq!(
            classify(20, dec!(2000000), Some(dec!(1000000)), &t),
            WhaleType::HolderTrader
        );
    }

    #[test]
    fn missing_portfolio_value_never_promotes() {
        let t = ClassifierThresholds::default();
        assert_eq!(classify(20, dec!(2000000), None, &t), WhaleType::Trader);
        assert_eq!(
            classify(20, dec!(2000000), Some(Decimal::ZERO), &t),
            WhaleType::Trader
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        let t = ClassifierThresholds {
            freq_hi: 10,
            volume_ratio_hi: 1.0,
        };
        assert_eq!(
            classify(10, dec!(100), Some(dec!(100)), &t),
            WhaleType::HolderTrader
        );
    }
}
