use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::db::event_repo::EventRecord;

/// Wire frame for the live event stream. Mirrors the shape of the stored
/// events API so clients render both the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub chain: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub wallet: LiveEventWallet,
    pub summary: String,
    pub value_usd: f64,
    pub tx_hash: Option<String>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEventWallet {
    pub address: String,
    pub chain: String,
    pub label: Option<String>,
}

impl LiveEvent {
    pub fn from_record(record: &EventRecord) -> Self {
        use rust_decimal::prelude::ToPrimitive;

        let label = record
            .labels
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        Self {
            id: record
                .tx_hash
                .clone()
                .unwrap_or_else(|| record.id.to_string()),
            timestamp: record.timestamp,
            chain: record.chain_slug.clone(),
            event_type: record.event_type.clone(),
            wallet: LiveEventWallet {
                address: record.address.clone(),
                chain: record.chain_slug.clone(),
                label,
            },
            summary: record.summary.clone().unwrap_or_default(),
            value_usd: record
                .value_usd
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0),
            tx_hash: record.tx_hash.clone(),
            details: record.details.clone().unwrap_or(serde_json::json!({})),
        }
    }
}

/// Per-subscriber queue depth before a slow consumer is dropped.
const SUBSCRIBER_BACKLOG: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<LiveEvent>,
}

/// Fan-out of newly persisted events to connected WebSocket clients.
///
/// Each subscriber owns a bounded queue; `publish` try-sends to a snapshot
/// of the set and removes subscribers whose queue is full or closed, so a
/// slow consumer can never block the collectors. Subscribers see only events
/// published after they connected — history comes from the store query.
pub struct Broadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber and get its event stream.
    pub fn subscribe(&self) -> mpsc::Receiver<LiveEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BACKLOG);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subscribers = self.subscribers.lock().expect("broadcaster lock");
            subscribers.push(Subscriber { id, tx });
            subscribers.len()
        };
        gauge!("live_subscribers").set(count as f64);
        tracing::debug!(subscriber_id = id, "Live event subscriber connected");
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("broadcaster lock").len()
    }

    /// Deliver an event to every live subscriber. Subscribers that have
    /// disconnected or overflowed their backlog are dropped.
    pub fn publish(&self, event: &LiveEvent) {
        let snapshot: Vec<(u64, mpsc::Sender<LiveEvent>)> = {
            let subscribers = self.subscribers.lock().expect("broadcaster lock");
            subscribers.iter().map(|s| (s.id, s.tx.clone())).collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let mut dropped: Vec<u64> = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = id, "Live subscriber overflowed, dropping");
                    dropped.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(id);
                }
            }
        }

        if !dropped.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("broadcaster lock");
            subscribers.retain(|s| !dropped.contains(&s.id));
            gauge!("live_subscribers").set(subscribers.len() as f64);
        }

        counter!("events_broadcast_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(value: f64) -> LiveEvent {
        LiveEvent {
            id: "0xabc".into(),
            timestamp: Utc::now(),
            chain: "evm".into(),
            event_type: "large_swap".into(),
            wallet: LiveEventWallet {
                address: "0xwallet".into(),
                chain: "evm".into(),
                label: None,
            },
            summary: "test".into(),
            value_usd: value,
            tx_hash: Some("0xabc".into()),
            details: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.publish(&event(1_000_000.0));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.value_usd, 1_000_000.0);
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed_on_publish() {
        let broadcaster = Broadcaster::new();
        let rx = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(rx);
        broadcaster.publish(&event(1.0));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_dropped_without_blocking() {
        let broadcaster = Broadcaster::new();
        let _rx = broadcaster.subscribe();

        // Never drain: the backlog fills, then the subscriber is dropped.
        for _ in 0..(SUBSCRIBER_BACKLOG + 2) {
            broadcaster.publish(&event(1.0));
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(&event(1.0));

        let mut rx = broadcaster.subscribe();
        broadcaster.publish(&event(2.0));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.value_usd, 2.0);
        assert!(rx.try_recv().is_err());
    }
}
