use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::SourceError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxStatus {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Prevout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    #[serde(default)]
    pub value: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxInput {
    #[serde(default)]
    pub prevout: Option<Prevout>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    #[serde(default)]
    pub value: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtxoTx {
    pub txid: String,
    #[serde(default)]
    pub status: TxStatus,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
}

impl UtxoTx {
    pub fn input_addresses(&self) -> impl Iterator<Item = &str> {
        self.vin
            .iter()
            .filter_map(|i| i.prevout.as_ref())
            .filter_map(|p| p.scriptpubkey_address.as_deref())
    }

    pub fn output_addresses(&self) -> impl Iterator<Item = &str> {
        self.vout
            .iter()
            .filter_map(|o| o.scriptpubkey_address.as_deref())
    }

    /// Satoshis paid to `address` across the outputs.
    pub fn value_to(&self, address: &str) -> u64 {
        self.vout
            .iter()
            .filter(|o| o.scriptpubkey_address.as_deref() == Some(address))
            .filter_map(|o| o.value)
            .sum()
    }

    /// Satoshis spent from `address` across the inputs.
    pub fn value_from(&self, address: &str) -> u64 {
        self.vin
            .iter()
            .filter_map(|i| i.prevout.as_ref())
            .filter(|p| p.scriptpubkey_address.as_deref() == Some(address))
            .filter_map(|p| p.value)
            .sum()
    }
}

/// Esplora-compatible client for the UTXO source. Address history pages are
/// 25 confirmed txs; `after_txid` continues past any single page.
#[derive(Debug, Clone)]
pub struct UtxoApiClient {
    http: Client,
    base_url: String,
}

impl UtxoApiClient {
    pub fn new(base_url: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One page of confirmed transactions for an address, newest first,
    /// starting after `after_txid` when given.
    pub async fn address_txs(
        &self,
        address: &str,
        after_txid: Option<&str>,
    ) -> Result<Vec<UtxoTx>, SourceError> {
        let url = match after_txid {
            Some(txid) => format!("{}/address/{}/txs/chain/{}", self.base_url, address, txid),
            None => format!("{}/address/{}/txs/chain", self.base_url, address),
        };

        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let txs: Vec<UtxoTx> = resp.json().await?;
        Ok(txs)
    }

    /// Full confirmed history newer than `stop_txid`, paginating until the
    /// stop tx or the end of history. Returned oldest first.
    pub async fn address_txs_until(
        &self,
        address: &str,
        stop_txid: Option<&str>,
        max_pages: usize,
    ) -> Result<Vec<UtxoTx>, SourceError> {
        let mut collected: Vec<UtxoTx> = Vec::new();
        let mut after: Option<String> = None;

        'pages: for _ in 0..max_pages {
            let page = self.address_txs(address, after.as_deref()).await?;
            if page.is_empty() {
                break;
            }
            let last_txid = page.last().map(|t| t.txid.clone());

            for tx in page {
                if stop_txid == Some(tx.txid.as_str()) {
                    break 'pages;
                }
                collected.push(tx);
            }

            after = last_txid;
        }

        // Esplora returns newest first; downstream wants oldest first.
        collected.reverse();
        Ok(collected)
    }
}
