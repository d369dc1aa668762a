pub mod backtest;
pub mod dashboard;
pub mod events;
pub mod health;
pub mod wallets;
pub mod whales;

use crate::db::whale_repo;
use crate::errors::AppError;
use crate::models::{Chain, Whale};
use crate::AppState;

/// Resolve `(chain slug, address)` to a whale or a 404.
pub async fn resolve_whale(
    state: &AppState,
    chain_slug: &str,
    address: &str,
) -> Result<(Whale, Chain), AppError> {
    let chain = whale_repo::get_chain_by_slug(&state.db, chain_slug)
        .await?
        .ok_or_else(|| AppError::NotFound("Chain not found".into()))?;
    let whale = whale_repo::get_whale_by_address(&state.db, chain.id, address)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet not found".into()))?;
    Ok((whale, chain))
}
