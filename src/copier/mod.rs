pub mod backtest;
pub mod live;

pub use backtest::{run_backtest, BacktestOutput, BacktestParams, BacktestSummary};
pub use live::CopierManager;
