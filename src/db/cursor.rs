use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

/// Opaque pagination cursor over `(timestamp, id)`. The comparator is
/// `timestamp DESC, id DESC`; a page continues strictly after the cursor
/// position, so concurrent inserts never duplicate or skip rows that
/// preceded the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeCursor {
    pub timestamp: DateTime<Utc>,
    pub id: i64,
}

impl TradeCursor {
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.timestamp.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(s: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (ts_part, id_part) = raw.split_once('|')?;
        let micros: i64 = ts_part.parse().ok()?;
        let id: i64 = id_part.parse().ok()?;
        let timestamp = DateTime::from_timestamp_micros(micros)?;
        Some(Self { timestamp, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips() {
        let cursor = TradeCursor {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap(),
            id: 4217,
        };
        let encoded = cursor.encode();
        assert_eq!(TradeCursor::decode(&encoded), Some(cursor));
    }

    #[test]
    fn rejects_garbage() {
        assert!(TradeCursor::decode("not-base64!!").is_none());
        assert!(TradeCursor::decode("").is_none());

        let no_separator = URL_SAFE_NO_PAD.encode(b"12345");
        assert!(TradeCursor::decode(&no_separator).is_none());
    }

    #[test]
    fn preserves_microsecond_precision() {
        let timestamp = DateTime::from_timestamp_micros(1_715_948_445_123_456).unwrap();
        let cursor = TradeCursor { timestamp, id: 1 };
        let decoded = TradeCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.timestamp.timestamp_micros(), 1_715_948_445_123_456);
    }
}
