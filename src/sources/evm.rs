use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::SourceError;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

// ERC-20 view selectors
const SELECTOR_SYMBOL: &str = "0x95d89b41";
const SELECTOR_DECIMALS: &str = "0x313ce567";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

impl RpcLog {
    pub fn block_number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.block_number)
    }

    /// Stable per-log key: transfers within one tx are distinct rows.
    pub fn tx_key(&self) -> String {
        format!("{}:{}", self.transaction_hash, self.log_index)
    }
}

/// JSON-RPC client for the EVM source. Only log-filtered reads — scanning
/// every transaction in every block is forbidden by the collector contract.
#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    http: Client,
    url: String,
}

impl EvmRpcClient {
    pub fn new(url: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            url: url.to_string(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let envelope: Value = resp.json().await?;
        if let Some(error) = envelope.get("error") {
            return Err(SourceError::Upstream(format!("{method}: {error}")));
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| SourceError::Decode(format!("{method}: missing result")))
    }

    pub async fn latest_block(&self) -> Result<u64, SourceError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| SourceError::Decode("eth_blockNumber: not a hex quantity".into()))
    }

    /// ERC-20 Transfer logs touching `wallet` as sender or recipient within
    /// `[from_block, to_block]`.
    pub async fn transfer_logs(
        &self,
        wallet: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RpcLog>, SourceError> {
        let padded = pad_address_topic(wallet);
        let mut logs = self
            .get_logs(json!({
                "fromBlock": to_hex(from_block),
                "toBlock": to_hex(to_block),
                "topics": [TRANSFER_TOPIC, padded],
            }))
            .await?;
        let incoming = self
            .get_logs(json!({
                "fromBlock": to_hex(from_block),
                "toBlock": to_hex(to_block),
                "topics": [TRANSFER_TOPIC, Value::Null, padded],
            }))
            .await?;
        logs.extend(incoming);
        logs.sort_by_key(|l| (l.block_number_u64().unwrap_or(0), l.log_index.clone()));
        Ok(logs)
    }

    async fn get_logs(&self, filter: Value) -> Result<Vec<RpcLog>, SourceError> {
        let result = self.call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result)
            .map_err(|e| SourceError::Decode(format!("eth_getLogs: {e}")))
    }

    /// Block timestamp (seconds) for a block number.
    pub async fn block_timestamp(&self, block_number: u64) -> Result<Option<i64>, SourceError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([to_hex(block_number), false]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let ts = result
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .ok_or_else(|| SourceError::Decode("block timestamp missing".into()))?;
        Ok(Some(ts as i64))
    }

    pub async fn erc20_symbol(&self, token: &str) -> Result<Option<String>, SourceError> {
        let result = self
            .call(
                "eth_call",
                json!([{"to": token, "data": SELECTOR_SYMBOL}, "latest"]),
            )
            .await?;
        Ok(result.as_str().and_then(decode_abi_string))
    }

    pub async fn erc20_decimals(&self, token: &str) -> Result<Option<u32>, SourceError> {
        let result = self
            .call(
                "eth_call",
                json!([{"to": token, "data": SELECTOR_DECIMALS}, "latest"]),
            )
            .await?;
        Ok(result
            .as_str()
            .and_then(parse_hex_u64)
            .map(|d| d.min(77) as u32))
    }
}

// ---------------------------------------------------------------------------
// Hex helpers
// ---------------------------------------------------------------------------

pub fn to_hex(n: u64) -> String {
    format!("{n:#x}")
}

pub fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Token quantity from a 256-bit hex word, scaled by the token's decimals.
/// Amounts beyond i128/Decimal range are rejected rather than truncated.
pub fn parse_hex_amount(data: &str, decimals: u32) -> Option<Decimal> {
    let trimmed = data.trim_start_matches("0x");
    let value = u128::from_str_radix(trimmed, 16).ok()?;
    let value = i128::try_from(value).ok()?;
    Decimal::try_from_i128_with_scale(value, decimals.min(28)).ok()
}

/// Wallet address padded to a 32-byte topic.
pub fn pad_address_topic(address: &str) -> String {
    let stripped = address.trim_start_matches("0x").to_lowercase();
    format!("0x{:0>64}", stripped)
}

/// Address recovered from a 32-byte topic.
pub fn topic_to_address(topic: &str) -> String {
    let stripped = topic.trim_start_matches("0x");
    let tail = if stripped.len() >= 40 {
        &stripped[stripped.len() - 40..]
    } else {
        stripped
    };
    format!("0x{}", tail.to_lowercase())
}

/// Minimal ABI string decoding for `symbol()` returns.
fn decode_abi_string(data: &str) -> Option<String> {
    let hex = data.trim_start_matches("0x");
    if hex.len() < 128 {
        return None;
    }
    let len = usize::from_str_radix(&hex[64..128], 16).ok()?;
    let chars = hex.get(128..128 + len * 2)?;
    let bytes: Vec<u8> = (0..chars.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&chars[i..i + 2], 16).ok())
        .collect();
    String::from_utf8(bytes).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn hex_quantities_round_trip() {
        assert_eq!(parse_hex_u64("0x1234"), Some(0x1234));
        assert_eq!(parse_hex_u64(&to_hex(19_000_000)), Some(19_000_000));
        assert_eq!(parse_hex_u64("not-hex"), None);
    }

    #[test]
    fn topic_padding_round_trips() {
        let address = "0x28c6c06298d514db089934071355e5743bf21d60";
        let topic = pad_address_topic(address);
        assert_eq!(topic.len(), 66);
        assert_eq!(topic_to_address(&topic), address);
    }

    #[test]
    fn amount_scaling_honors_decimals() {
        // 1.5 tokens with 18 decimals
        let raw = format!("0x{:064x}", 1_500_000_000_000_000_000u128);
        assert_eq!(parse_hex_amount(&raw, 18), Some(dec!(1.5)));

        // 250 USDC (6 decimals)
        let raw = format!("0x{:064x}", 250_000_000u128);
        assert_eq!(parse_hex_amount(&raw, 6), Some(dec!(250)));
    }

    #[test]
    fn zero_amount_parses() {
        let raw = format!("0x{:064x}", 0u128);
        assert_eq!(parse_hex_amount(&raw, 18), Some(Decimal::ZERO));
    }
}
