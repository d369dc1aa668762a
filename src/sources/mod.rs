pub mod catalog;
pub mod evm;
pub mod perp;
pub mod utxo;

pub use evm::EvmRpcClient;
pub use perp::PerpInfoClient;
pub use utxo::UtxoApiClient;
