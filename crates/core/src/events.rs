use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;

/// Default per-subscriber buffer. When a subscriber lags past this many
/// messages, the oldest are dropped and the drop count is reported.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Lifecycle events fanned out to the dashboard and test harnesses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusEvent {
    TradeCreated {
        trade_id: i64,
        direction: String,
        option_symbol: String,
        strike: Decimal,
        status: String,
    },
    TradeFilled {
        trade_id: i64,
        entry_price: Decimal,
        stop_loss_price: Decimal,
    },
    TradeClosed {
        trade_id: i64,
        exit_price: Decimal,
        pnl_dollars: Decimal,
        pnl_percent: Decimal,
        exit_reason: String,
    },
    TradeCancelled {
        trade_id: i64,
        reason: String,
    },
    AlertReceived {
        alert_id: i64,
        ticker: String,
        action: String,
    },
}

impl BusEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TradeCreated { .. } => "trade_created",
            Self::TradeFilled { .. } => "trade_filled",
            Self::TradeClosed { .. } => "trade_closed",
            Self::TradeCancelled { .. } => "trade_cancelled",
            Self::AlertReceived { .. } => "alert_received",
        }
    }

    /// Wire form consumed by the dashboard WebSocket: `{event, data}`.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        let data = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => {
                map.into_iter().next().map_or_else(|| json!({}), |(_, v)| v)
            }
            _ => json!({}),
        };
        json!({ "event": self.name(), "data": data })
    }
}

/// In-process pub/sub for trade and alert lifecycle events.
///
/// Publish never blocks. Each subscriber has a bounded buffer; a slow
/// subscriber loses the oldest messages and learns how many were dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BusEvent) {
        // Send only fails when there are no subscribers, which is fine.
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct EventSubscriber {
    rx: broadcast::Receiver<BusEvent>,
    dropped: u64,
}

impl EventSubscriber {
    /// Receives the next event, skipping over any gap left by buffer overflow.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::warn!(dropped = n, "Event bus subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total messages this subscriber has lost to buffer overflow.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cancelled(id: i64) -> BusEvent {
        BusEvent::TradeCancelled {
            trade_id: id,
            reason: "LIMIT_TIMEOUT".to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();

        bus.publish(BusEvent::TradeFilled {
            trade_id: 7,
            entry_price: dec!(0.42),
            stop_loss_price: dec!(0.22),
        });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.name(), "trade_filled");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(cancelled(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_counts() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe();

        for i in 0..10 {
            bus.publish(cancelled(i));
        }

        // The first receivable event is not the first published one.
        let first = sub.recv().await.unwrap();
        match first {
            BusEvent::TradeCancelled { trade_id, .. } => assert!(trade_id > 0),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sub.dropped() > 0);
    }

    #[test]
    fn wire_form_has_event_and_data() {
        let wire = cancelled(3).to_wire();
        assert_eq!(wire["event"], "trade_cancelled");
        assert_eq!(wire["data"]["trade_id"], 3);
    }
}
