pub mod classifier;
pub mod cost_basis;
pub mod engine;

pub use classifier::{classify, ClassifierThresholds};
pub use cost_basis::{Applied, LotBook};
pub use engine::MetricsEngine;
