use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use crate::models::TradeDirection;

/// One open cost-basis lot. `unit_cost_usd` is None when the trade that
/// created it had no known USD value; such lots still track quantity so
/// later closes consume the right amount.
#[derive(Debug, Clone)]
struct Lot {
    quantity: Decimal,
    unit_cost_usd: Option<Decimal>,
}

#[derive(Debug, Default)]
struct AssetLots {
    lots: VecDeque<Lot>,
}

impl AssetLots {
    fn open_quantity(&self) -> Decimal {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    fn open_cost(&self) -> Decimal {
        self.lots
            .iter()
            .filter_map(|l| l.unit_cost_usd.map(|c| c * l.quantity))
            .sum()
    }
}

/// Outcome of applying one trade to the book.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Entry,
    Exit {
        realized_pnl_usd: Option<Decimal>,
        quantity_closed: Decimal,
    },
    Ignored,
}

/// Per-asset FIFO lot book with a running cash ledger.
///
/// Entries (buy / long / short / deposit) add a lot at the trade's unit
/// cost. Exits (sell / close / withdraw) consume lots front-first; a partial
/// close apportions the front lot's cost pro rata. Realized PnL on an exit
/// is `exit value − cost of consumed lots` when both sides are known, or the
/// source-stated PnL when the ledger provides one (perp fills).
#[derive(Debug, Default)]
pub struct LotBook {
    assets: HashMap<String, AssetLots>,
    realized_pnl_usd: Decimal,
    deposits_usd: Decimal,
    withdrawals_usd: Decimal,
    cost_inflow_usd: Decimal,
    closed_positions: u32,
    winning_positions: u32,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(
        &mut self,
        asset: &str,
        direction: TradeDirection,
        quantity: Option<Decimal>,
        value_usd: Option<Decimal>,
        stated_pnl_usd: Option<Decimal>,
    ) -> Applied {
        match direction {
            d if d.is_entry() => {
                if direction == TradeDirection::Deposit {
                    if let Some(value) = value_usd {
                        self.deposits_usd += value.abs();
                    }
                }
                if let Some(value) = value_usd {
                    self.cost_inflow_usd += value.abs();
                }

                let Some(quantity) = quantity.map(|q| q.abs()).filter(|q| !q.is_zero()) else {
                    return Applied::Ignored;
                };
                let unit_cost = value_usd.map(|v| v.abs() / quantity);
                self.assets
                    .entry(asset.to_uppercase())
                    .or_default()
                    .lots
                    .push_back(Lot {
                        quantity,
                        unit_cost_usd: unit_cost,
                    });
                Applied::Entry
            }
            d if d.is_exit() => {
                if direction == TradeDirection::Withdraw {
                    if let Some(value) = value_usd {
                        self.withdrawals_usd += value.abs();
                    }
                }
                self.close(asset, quantity, value_usd, stated_pnl_usd)
            }
            _ => Applied::Ignored,
        }
    }

    fn close(
        &mut self,
        asset: &str,
        quantity: Option<Decimal>,
        value_usd: Option<Decimal>,
        stated_pnl_usd: Option<Decimal>,
    ) -> Applied {
        let book = self.assets.entry(asset.to_uppercase()).or_default();
        let open = book.open_quantity();
        let requested = quantity.map(|q| q.abs()).unwrap_or(open);

        if open.is_zero() || requested.is_zero() {
            // Nothing to close against. A source-stated PnL still counts
            // toward the realized ledger and win-rate.
            if let Some(pnl) = stated_pnl_usd {
                self.realized_pnl_usd += pnl;
                self.record_close_outcome(pnl);
                return Applied::Exit {
                    realized_pnl_usd: Some(pnl),
                    quantity_closed: Decimal::ZERO,
                };
            }
            return Applied::Ignored;
        }

        let to_close = requested.min(open);
        let mut remaining = to_close;
        let mut cost_out: Option<Decimal> = Some(Decimal::ZERO);

        while remaining > Decimal::ZERO {
            let Some(front) = book.lots.front_mut() else {
                break;
            };
            let take = front.quantity.min(remaining);
            match front.unit_cost_usd {
                Some(unit_cost) => {
                    if let Some(total) = cost_out.as_mut() {
                        *total += unit_cost * take;
                    }
                }
                // A lot without cost poisons the cost side of this close.
                None => cost_out = None,
            }
            front.quantity -= take;
            remaining -= take;
            if front.quantity.is_zero() {
                book.lots.pop_front();
            }
        }

        let realized = match stated_pnl_usd {
            Some(pnl) => Some(pnl),
            None => match (value_usd, cost_out) {
                (Some(value), Some(cost)) => {
                    // Pro-rate the exit value when only part of it closed lots.
                    let exit_value = if requested > to_close && !requested.is_zero() {
                        value.abs() * to_close / requested
                    } else {
                        value.abs()
                    };
                    Some(exit_value - cost)
                }
                _ => None,
            },
        };

        if let Some(pnl) = realized {
            self.realized_pnl_usd += pnl;
            self.record_close_outcome(pnl);
        }

        Applied::Exit {
            realized_pnl_usd: realized,
            quantity_closed: to_close,
        }
    }

    fn record_close_outcome(&mut self, pnl: Decimal) {
        self.closed_positions += 1;
        if pnl > Decimal::ZERO {
            self.winning_positions += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// Open `(asset, quantity, cost_usd)` triples. Cost is None when any
    /// contributing lot had no known USD value.
    pub fn open_positions(&self) -> Vec<(String, Decimal, Option<Decimal>)> {
        let mut out: Vec<(String, Decimal, Option<Decimal>)> = self
            .assets
            .iter()
            .filter(|(_, book)| !book.open_quantity().is_zero())
            .map(|(asset, book)| {
                let qty = book.open_quantity();
                let all_costed = book.lots.iter().all(|l| l.unit_cost_usd.is_some());
                let cost = all_costed.then(|| book.open_cost());
                (asset.clone(), qty, cost)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn open_quantity(&self, asset: &str) -> Decimal {
        self.assets
            .get(&asset.to_uppercase())
            .map(|b| b.open_quantity())
            .unwrap_or_default()
    }

    pub fn realized_pnl_usd(&self) -> Decimal {
        self.realized_pnl_usd
    }

    pub fn deposits_usd(&self) -> Decimal {
        self.deposits_usd
    }

    pub fn withdrawals_usd(&self) -> Decimal {
        self.withdrawals_usd
    }

    /// Total USD paid into entries, the ROI denominator fallback when the
    /// whale has no explicit deposits.
    pub fn cost_inflow_usd(&self) -> Decimal {
        self.cost_inflow_usd
    }

    pub fn closed_positions(&self) -> u32 {
        self.closed_positions
    }

    /// Win rate over closed positions, percent. None before the first close.
    pub fn win_rate_percent(&self) -> Option<f64> {
        if self.closed_positions == 0 {
            return None;
        }
        Some(f64::from(self.winning_positions) / f64::from(self.closed_positions) * 100.0)
    }

    /// Cumulative ROI percent given current unrealized PnL. Zero-deposit
    /// wallets fall back to total cost inflow as the denominator; with
    /// neither, ROI is 0 rather than a division by zero.
    pub fn roi_percent(&self, unrealized_pnl_usd: Decimal) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        let denominator = if self.deposits_usd > Decimal::ZERO {
            self.deposits_usd
        } else if self.cost_inflow_usd > Decimal::ZERO {
            self.cost_inflow_usd
        } else {
            return 0.0;
        };

        ((self.realized_pnl_usd + unrealized_pnl_usd) / denominator * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(book: &mut LotBook, asset: &str, qty: Decimal, value: Decimal) {
        book.apply(asset, TradeDirection::Buy, Some(qty), Some(value), None);
    }

    fn sell(book: &mut LotBook, asset: &str, qty: Decimal, value: Decimal) -> Applied {
        book.apply(asset, TradeDirection::Sell, Some(qty), Some(value), None)
    }

    #[test]
    fn buy_then_sell_realizes_gain() {
        let mut book = LotBook::new();
        book.apply("BTC", TradeDirection::Deposit, None, Some(dec!(10000)), None);
        buy(&mut book, "BTC", dec!(1), dec!(50000));

        let applied = sell(&mut book, "BTC", dec!(1), dec!(60000));
        assert_eq!(
            applied,
            Applied::Exit {
                realized_pnl_usd: Some(dec!(10000)),
                quantity_closed: dec!(1),
            }
        );
        assert_eq!(book.realized_pnl_usd(), dec!(10000));
        assert_eq!(book.open_quantity("BTC"), Decimal::ZERO);
        assert_eq!(book.roi_percent(Decimal::ZERO), 100.0);
    }

    #[test]
    fn fifo_consumes_oldest_lot_first() {
        let mut book = LotBook::new();
        buy(&mut book, "ETH", dec!(1), dec!(1000)); // unit cost 1000
        buy(&mut book, "ETH", dec!(1), dec!(3000)); // unit cost 3000

        // Selling one at 2000 closes the 1000-cost lot: +1000
        let applied = sell(&mut book, "ETH", dec!(1), dec!(2000));
        assert_eq!(
            applied,
            Applied::Exit {
                realized_pnl_usd: Some(dec!(1000)),
                quantity_closed: dec!(1),
            }
        );

        let open = book.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].1, dec!(1));
        assert_eq!(open[0].2, Some(dec!(3000)));
    }

    #[test]
    fn partial_close_apportions_pro_rata() {
        let mut book = LotBook::new();
        buy(&mut book, "SOL", dec!(10), dec!(1000)); // unit cost 100

        let applied = sell(&mut book, "SOL", dec!(4), dec!(600)); // exit at 150
        assert_eq!(
            applied,
            Applied::Exit {
                realized_pnl_usd: Some(dec!(200)), // 600 − 4×100
                quantity_closed: dec!(4),
            }
        );
        assert_eq!(book.open_quantity("SOL"), dec!(6));

        let open = book.open_positions();
        assert_eq!(open[0].2, Some(dec!(600))); // 6 × 100 remains
    }

    #[test]
    fn oversized_close_clamps_to_open_quantity() {
        let mut book = LotBook::new();
        buy(&mut book, "BTC", dec!(1), dec!(40000));

        let applied = sell(&mut book, "BTC", dec!(2), dec!(100000));
        // Only half the exit value applies to the single open unit.
        assert_eq!(
            applied,
            Applied::Exit {
                realized_pnl_usd: Some(dec!(10000)),
                quantity_closed: dec!(1),
            }
        );
        assert_eq!(book.open_quantity("BTC"), Decimal::ZERO);
    }

    #[test]
    fn close_without_open_lots_is_ignored_without_stated_pnl() {
        let mut book = LotBook::new();
        assert_eq!(
            sell(&mut book, "BTC", dec!(1), dec!(50000)),
            Applied::Ignored
        );
        assert_eq!(book.realized_pnl_usd(), Decimal::ZERO);
    }

    #[test]
    fn stated_pnl_overrides_lot_math() {
        let mut book = LotBook::new();
        buy(&mut book, "ETH", dec!(2), dec!(6000));

        let applied = book.apply(
            "ETH",
            TradeDirection::CloseLong,
            Some(dec!(2)),
            Some(dec!(7000)),
            Some(dec!(950)), // ledger-reported, net of funding
        );
        assert_eq!(
            applied,
            Applied::Exit {
                realized_pnl_usd: Some(dec!(950)),
                quantity_closed: dec!(2),
            }
        );
        assert_eq!(book.realized_pnl_usd(), dec!(950));
    }

    #[test]
    fn unknown_value_poisons_cost_not_quantity() {
        let mut book = LotBook::new();
        book.apply("XYZ", TradeDirection::Buy, Some(dec!(5)), None, None);

        let open = book.open_positions();
        assert_eq!(open[0].1, dec!(5));
        assert_eq!(open[0].2, None);

        // A close against an uncosted lot has no computable PnL.
        let applied = sell(&mut book, "XYZ", dec!(5), dec!(100));
        assert_eq!(
            applied,
            Applied::Exit {
                realized_pnl_usd: None,
                quantity_closed: dec!(5),
            }
        );
        assert_eq!(book.closed_positions(), 0);
    }

    #[test]
    fn win_rate_counts_closed_positions_only() {
        let mut book = LotBook::new();
        buy(&mut book, "A", dec!(1), dec!(100));
        buy(&mut book, "B", dec!(1), dec!(100));
        buy(&mut book, "C", dec!(1), dec!(100));

        sell(&mut book, "A", dec!(1), dec!(150)); // win
        sell(&mut book, "B", dec!(1), dec!(50)); // loss
        // C stays open

        assert_eq!(book.closed_positions(), 2);
        assert_eq!(book.win_rate_percent(), Some(50.0));
    }

    #[test]
    fn zero_deposit_wallet_has_finite_roi() {
        let mut book = LotBook::new();
        buy(&mut book, "BTC", dec!(1), dec!(50000));
        sell(&mut book, "BTC", dec!(1), dec!(55000));

        // Falls back to cost inflow as denominator: 5000 / 50000
        assert_eq!(book.roi_percent(Decimal::ZERO), 10.0);

        let empty = LotBook::new();
        assert_eq!(empty.roi_percent(Decimal::ZERO), 0.0);
    }

    #[test]
    fn withdrawals_reduce_nothing_but_are_tracked() {
        let mut book = LotBook::new();
        book.apply("BTC", TradeDirection::Deposit, Some(dec!(1)), Some(dec!(50000)), None);
        book.apply("BTC", TradeDirection::Withdraw, Some(dec!(1)), Some(dec!(52000)), None);

        assert_eq!(book.deposits_usd(), dec!(50000));
        assert_eq!(book.withdrawals_usd(), dec!(52000));
        assert_eq!(book.open_quantity("BTC"), Decimal::ZERO);
    }
}
