//! Curated counterparty address catalog.
//!
//! Collectors classify trade counterparties against this set to tag exchange
//! deposits/withdrawals, bridge traffic, and DEX router swaps. The catalog is
//! versioned; every trade classified through it records the version so
//! history can be re-tagged when entries drift.

/// Bumped whenever the address set changes.
pub const CATALOG_VERSION: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterpartyKind {
    Exchange,
    Bridge,
    DexRouter,
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub address: &'static str,
    pub label: &'static str,
    pub kind: CounterpartyKind,
}

const ENTRIES: &[CatalogEntry] = &[
    // EVM exchange hot wallets
    CatalogEntry { address: "0x28c6c06298d514db089934071355e5743bf21d60", label: "binance", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "0x21a31ee1afc51d94c2efccaa2092ad1028285549", label: "binance", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "0x71660c4005ba85c37ccec55d0c4493e66fe775d3", label: "coinbase", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "0xa9d1e08c7793af67e9d92fe308d5697fb81d3e43", label: "coinbase", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "0x2b5634c42055806a59e9107ed44d43c426e58258", label: "kucoin", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "0xe92d1a43df510f82c66382592a047d288f85226f", label: "okx", kind: CounterpartyKind::Exchange },
    // EVM DEX routers
    CatalogEntry { address: "0x7a250d5630b4cf539739df2c5dacb4c659f2488d", label: "uniswap_v2", kind: CounterpartyKind::DexRouter },
    CatalogEntry { address: "0xe592427a0aece92de3edee1f18e0157c05861564", label: "uniswap_v3", kind: CounterpartyKind::DexRouter },
    CatalogEntry { address: "0x1111111254eeb25477b68fb85ed929f73a960582", label: "1inch", kind: CounterpartyKind::DexRouter },
    CatalogEntry { address: "0xdef1c0ded9bec7f1a1670819833240f027b25eff", label: "0x", kind: CounterpartyKind::DexRouter },
    // EVM bridges
    CatalogEntry { address: "0x3ee18b2214aff97000d974cf647e7c347e8fa585", label: "wormhole", kind: CounterpartyKind::Bridge },
    CatalogEntry { address: "0x99c9fc46f92e8a1c0dec1b1747d010903e884be1", label: "optimism_gateway", kind: CounterpartyKind::Bridge },
    // UTXO exchange hot wallets
    CatalogEntry { address: "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh", label: "coinbase", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "bc1qtc2gl9y0lhgs6vh7z0p4lrcxarp94x9cc57y6p", label: "binance", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "3d2oetdnuzuqqhpjmcmdddhyoqkynvsfk9r", label: "bitfinex", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "3m219kr6ql7hjiqz4ttmi3j3z9cpo5vud4", label: "kraken", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "bc1q592d4j0gyu40m6az04q9u3d0sy4p9t7dun9w6c", label: "gemini", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "bc1q0htcv84h8dl0tvkmx3spptclc373x3p3dnc3f4", label: "okx", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "bc1qn0e0y7tsawhfpyu0sn3c90d82tgkkjt2y7tsg2", label: "binance", kind: CounterpartyKind::Exchange },
    CatalogEntry { address: "bc1q2v9kec8sg9f3rv9p5c9pn9vyf0a9keat8wr87p", label: "bybit", kind: CounterpartyKind::Exchange },
];

/// Look up a counterparty address. Matching is case-insensitive.
pub fn classify(address: &str) -> Option<&'static CatalogEntry> {
    let lower = address.to_lowercase();
    ENTRIES.iter().find(|e| e.address == lower)
}

pub fn is_exchange(address: &str) -> bool {
    matches!(
        classify(address),
        Some(CatalogEntry {
            kind: CounterpartyKind::Exchange,
            ..
        })
    )
}

pub fn is_dex_router(address: &str) -> bool {
    matches!(
        classify(address),
        Some(CatalogEntry {
            kind: CounterpartyKind::DexRouter,
            ..
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_exchange_case_insensitive() {
        let entry = classify("0x28C6c06298d514Db089934071355E5743bf21d60").unwrap();
        assert_eq!(entry.label, "binance");
        assert_eq!(entry.kind, CounterpartyKind::Exchange);
    }

    #[test]
    fn router_and_exchange_predicates_disagree() {
        assert!(is_dex_router("0x7a250d5630b4cf539739df2c5dacb4c659f2488d"));
        assert!(!is_exchange("0x7a250d5630b4cf539739df2c5dacb4c659f2488d"));
    }

    #[test]
    fn unknown_address_is_unclassified() {
        assert!(classify("0x0000000000000000000000000000000000000001").is_none());
    }
}
