//! Streaming quote cache.
//!
//! One writer (the stream task) updates snapshots; monitors read
//! concurrently. A symbol is subscribed while it appears in any open trade
//! or enabled strategy; `get` hides quotes older than the staleness window
//! so callers fall back to the broker's REST quote.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Equity,
    Option,
}

#[derive(Debug, Clone)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    /// Cumulative session volume as reported by the stream.
    pub day_volume: u64,
    pub received_at: DateTime<Utc>,
}

impl QuoteSnapshot {
    #[must_use]
    pub fn mid(&self) -> Decimal {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            (self.bid + self.ask) / Decimal::TWO
        } else {
            self.last
        }
    }

    #[must_use]
    pub fn spread_percent(&self) -> f64 {
        let mid = self.mid();
        if mid <= Decimal::ZERO || self.bid <= Decimal::ZERO || self.ask <= Decimal::ZERO {
            return 0.0;
        }
        ((self.ask - self.bid) / mid * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }
}

/// Subscription changes forwarded to the stream task.
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Subscribe { symbol: String, kind: QuoteKind },
    Unsubscribe { symbol: String, kind: QuoteKind },
}

pub struct QuoteCache {
    quotes: RwLock<HashMap<String, QuoteSnapshot>>,
    subscriptions: RwLock<HashMap<String, QuoteKind>>,
    commands: Mutex<Option<mpsc::UnboundedSender<StreamCommand>>>,
    stale_after: Duration,
}

impl QuoteCache {
    #[must_use]
    pub fn new(stale_after_secs: i64) -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            commands: Mutex::new(None),
            stale_after: Duration::seconds(stale_after_secs),
        }
    }

    /// Attaches the stream task's command channel. Pending subscriptions are
    /// replayed so a reconnecting stream resumes the full set.
    pub fn attach_stream(&self, tx: mpsc::UnboundedSender<StreamCommand>) {
        for (symbol, kind) in self.subscriptions.read().iter() {
            let _ = tx.send(StreamCommand::Subscribe {
                symbol: symbol.clone(),
                kind: *kind,
            });
        }
        *self.commands.lock() = Some(tx);
    }

    pub fn subscribe(&self, symbol: &str, kind: QuoteKind) {
        let mut subs = self.subscriptions.write();
        if subs.insert(symbol.to_string(), kind).is_none() {
            tracing::debug!(symbol, ?kind, "Quote subscription added");
            if let Some(tx) = self.commands.lock().as_ref() {
                let _ = tx.send(StreamCommand::Subscribe {
                    symbol: symbol.to_string(),
                    kind,
                });
            }
        }
    }

    pub fn unsubscribe(&self, symbol: &str) {
        let mut subs = self.subscriptions.write();
        if let Some(kind) = subs.remove(symbol) {
            tracing::debug!(symbol, "Quote subscription removed");
            self.quotes.write().remove(symbol);
            if let Some(tx) = self.commands.lock().as_ref() {
                let _ = tx.send(StreamCommand::Unsubscribe {
                    symbol: symbol.to_string(),
                    kind,
                });
            }
        }
    }

    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.read().keys().cloned().collect()
    }

    /// Applies a streamed quote update. Called only by the stream task.
    pub fn apply(&self, symbol: &str, bid: Decimal, ask: Decimal, last: Decimal, day_volume: u64) {
        self.apply_at(symbol, bid, ask, last, day_volume, Utc::now());
    }

    pub fn apply_at(
        &self,
        symbol: &str,
        bid: Decimal,
        ask: Decimal,
        last: Decimal,
        day_volume: u64,
        received_at: DateTime<Utc>,
    ) {
        let mut quotes = self.quotes.write();
        quotes.insert(
            symbol.to_string(),
            QuoteSnapshot {
                symbol: symbol.to_string(),
                bid,
                ask,
                last,
                day_volume,
                received_at,
            },
        );
    }

    /// Freshest quote for a symbol, or `None` when missing or stale.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<QuoteSnapshot> {
        self.get_at(symbol, Utc::now())
    }

    #[must_use]
    pub fn get_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<QuoteSnapshot> {
        let quotes = self.quotes.read();
        let snap = quotes.get(symbol)?;
        if now - snap.received_at > self.stale_after {
            return None;
        }
        Some(snap.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fresh_quote_is_returned() {
        let cache = QuoteCache::new(5);
        cache.apply("SPY", dec!(694.40), dec!(694.42), dec!(694.41), 1_000);
        let snap = cache.get("SPY").unwrap();
        assert_eq!(snap.mid(), dec!(694.41));
    }

    #[test]
    fn stale_quote_is_hidden() {
        let cache = QuoteCache::new(5);
        let old = Utc::now() - Duration::seconds(10);
        cache.apply_at("SPY", dec!(694.40), dec!(694.42), dec!(694.41), 1_000, old);
        assert!(cache.get("SPY").is_none());
    }

    #[test]
    fn miss_returns_none() {
        let cache = QuoteCache::new(5);
        assert!(cache.get("QQQ").is_none());
    }

    #[test]
    fn unsubscribe_drops_cached_quote() {
        let cache = QuoteCache::new(5);
        cache.subscribe("SPY", QuoteKind::Equity);
        cache.apply("SPY", dec!(1), dec!(2), dec!(1.5), 10);
        cache.unsubscribe("SPY");
        assert!(cache.get("SPY").is_none());
        assert!(cache.subscribed_symbols().is_empty());
    }

    #[test]
    fn one_sided_quote_mid_falls_back_to_last() {
        let cache = QuoteCache::new(5);
        cache.apply("SPY", dec!(0), dec!(0), dec!(694.00), 0);
        let snap = cache.get("SPY").unwrap();
        assert_eq!(snap.mid(), dec!(694.00));
        assert_eq!(snap.spread_percent(), 0.0);
    }

    #[test]
    fn attach_stream_replays_subscriptions() {
        let cache = QuoteCache::new(5);
        cache.subscribe("SPY", QuoteKind::Equity);
        cache.subscribe("$VIX.X", QuoteKind::Equity);

        let (tx, mut rx) = mpsc::unbounded_channel();
        cache.attach_stream(tx);

        let mut replayed = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            if let StreamCommand::Subscribe { symbol, .. } = cmd {
                replayed.push(symbol);
            }
        }
        replayed.sort();
        assert_eq!(replayed, vec!["$VIX.X", "SPY"]);
    }
}
