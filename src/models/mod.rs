pub mod backtest;
pub mod checkpoint;
pub mod event;
pub mod holding;
pub mod metrics;
pub mod trade;
pub mod whale;

pub use backtest::{BacktestRun, CopierSessionRow};
pub use checkpoint::{BackfillStatus, IngestionCheckpoint};
pub use event::{Event, NewEvent};
pub use holding::{Holding, NewHolding};
pub use metrics::{CurrentWalletMetrics, WalletMetricsDaily};
pub use trade::{NewTrade, Trade};
pub use whale::{Chain, Whale};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TradeSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSource {
    Onchain,
    Perp,
    ExchangeFlow,
}

impl TradeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSource::Onchain => "onchain",
            TradeSource::Perp => "perp",
            TradeSource::ExchangeFlow => "exchange_flow",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "onchain" => Some(TradeSource::Onchain),
            "perp" => Some(TradeSource::Perp),
            "exchange_flow" => Some(TradeSource::ExchangeFlow),
            _ => None,
        }
    }
}

impl fmt::Display for TradeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TradeDirection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Buy,
    Sell,
    Deposit,
    Withdraw,
    Long,
    Short,
    CloseLong,
    CloseShort,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
            TradeDirection::Deposit => "deposit",
            TradeDirection::Withdraw => "withdraw",
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
            TradeDirection::CloseLong => "close_long",
            TradeDirection::CloseShort => "close_short",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(TradeDirection::Buy),
            "sell" => Some(TradeDirection::Sell),
            "deposit" => Some(TradeDirection::Deposit),
            "withdraw" => Some(TradeDirection::Withdraw),
            "long" => Some(TradeDirection::Long),
            "short" => Some(TradeDirection::Short),
            "close_long" => Some(TradeDirection::CloseLong),
            "close_short" => Some(TradeDirection::CloseShort),
            _ => None,
        }
    }

    /// Directions that open or add to a position (cost-basis inflow).
    pub fn is_entry(&self) -> bool {
        matches!(
            self,
            TradeDirection::Buy
                | TradeDirection::Deposit
                | TradeDirection::Long
                | TradeDirection::Short
        )
    }

    /// Directions that reduce or close a position (cost-basis outflow).
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            TradeDirection::Sell
                | TradeDirection::Withdraw
                | TradeDirection::CloseLong
                | TradeDirection::CloseShort
        )
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LargeSwap,
    LargeTransfer,
    ExchangeFlow,
    PerpTrade,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LargeSwap => "large_swap",
            EventType::LargeTransfer => "large_transfer",
            EventType::ExchangeFlow => "exchange_flow",
            EventType::PerpTrade => "perp_trade",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WhaleType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhaleType {
    Holder,
    Trader,
    HolderTrader,
}

impl WhaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhaleType::Holder => "holder",
            WhaleType::Trader => "trader",
            WhaleType::HolderTrader => "holder_trader",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "holder" => Some(WhaleType::Holder),
            "trader" => Some(WhaleType::Trader),
            "holder_trader" => Some(WhaleType::HolderTrader),
            _ => None,
        }
    }
}

impl fmt::Display for WhaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BackfillState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    Idle,
    Running,
    Done,
    Error,
}

impl BackfillState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillState::Idle => "idle",
            BackfillState::Running => "running",
            BackfillState::Done => "done",
            BackfillState::Error => "error",
        }
    }
}

impl fmt::Display for BackfillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
