//! WebSocket quote stream feeding the [`QuoteCache`].
//!
//! Owns the broker's streaming connection, applies delta updates to the
//! cache, and honors subscribe/unsubscribe commands. Reconnects with a
//! capped backoff; between broker frames it observes the shutdown flag.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::quote_cache::{QuoteCache, QuoteKind, StreamCommand};

const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct QuoteFrame {
    symbol: String,
    #[serde(default)]
    bid: Option<Decimal>,
    #[serde(default)]
    ask: Option<Decimal>,
    #[serde(default)]
    last: Option<Decimal>,
    #[serde(default)]
    volume: Option<u64>,
}

pub struct QuoteStream {
    ws_url: String,
    cache: Arc<QuoteCache>,
    commands: mpsc::UnboundedReceiver<StreamCommand>,
    shutdown: watch::Receiver<bool>,
}

impl QuoteStream {
    #[must_use]
    pub fn new(
        ws_url: String,
        cache: Arc<QuoteCache>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, mpsc::UnboundedSender<StreamCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        cache.attach_stream(tx.clone());
        (
            Self {
                ws_url,
                cache,
                commands: rx,
                shutdown,
            },
            tx,
        )
    }

    pub async fn run(mut self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.run_connection().await {
                Ok(()) => break,
                Err(err) => {
                    tracing::warn!(%err, backoff_secs = backoff.as_secs(), "Quote stream disconnected, reconnecting");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                }
            }
        }
        tracing::info!("Quote stream stopped");
    }

    async fn run_connection(&mut self) -> anyhow::Result<()> {
        let (ws, _) = connect_async(&self.ws_url).await?;
        tracing::info!(url = self.ws_url, "Quote stream connected");
        let (mut sink, mut source) = ws.split();

        // Re-issue the current subscription set on every (re)connect.
        for symbol in self.cache.subscribed_symbols() {
            let frame = subscription_frame(&symbol, "ADD");
            sink.send(Message::Text(frame)).await?;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(StreamCommand::Subscribe { symbol, .. }) => {
                            sink.send(Message::Text(subscription_frame(&symbol, "ADD"))).await?;
                        }
                        Some(StreamCommand::Unsubscribe { symbol, .. }) => {
                            sink.send(Message::Text(subscription_frame(&symbol, "UNSUBS"))).await?;
                        }
                        None => return Ok(()),
                    }
                }
                msg = source.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            sink.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            anyhow::bail!("stream closed by broker");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame: QuoteFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => {
                tracing::debug!(raw = text, "Ignoring non-quote stream frame");
                return;
            }
        };
        // Delta updates: keep prior values for fields absent from the frame.
        let prior = self.cache.get_at(&frame.symbol, chrono::Utc::now());
        let bid = frame.bid.or(prior.as_ref().map(|p| p.bid)).unwrap_or_default();
        let ask = frame.ask.or(prior.as_ref().map(|p| p.ask)).unwrap_or_default();
        let last = frame.last.or(prior.as_ref().map(|p| p.last)).unwrap_or_default();
        let volume = frame.volume.or(prior.map(|p| p.day_volume)).unwrap_or_default();
        self.cache.apply(&frame.symbol, bid, ask, last, volume);
    }
}

fn subscription_frame(symbol: &str, command: &str) -> String {
    json!({ "command": command, "symbol": symbol }).to_string()
}

/// Subscribes the always-on symbols every session needs (VIX for the
/// circuit breaker plus the configured underlyings).
pub fn subscribe_base_symbols(cache: &QuoteCache, tickers: &[String], vix_symbol: &str) {
    for ticker in tickers {
        cache.subscribe(ticker, QuoteKind::Equity);
    }
    cache.subscribe(vix_symbol, QuoteKind::Equity);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_frame_shape() {
        let frame = subscription_frame("SPY", "ADD");
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["command"], "ADD");
        assert_eq!(v["symbol"], "SPY");
    }

    #[test]
    fn base_symbols_include_vix() {
        let cache = QuoteCache::new(5);
        subscribe_base_symbols(
            &cache,
            &["SPY".to_string(), "QQQ".to_string()],
            "$VIX.X",
        );
        let mut symbols = cache.subscribed_symbols();
        symbols.sort();
        assert_eq!(symbols, vec!["$VIX.X", "QQQ", "SPY"]);
    }
}
