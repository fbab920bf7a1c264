//! Order-fill polling.
//!
//! Walks the day's non-terminal trades, polls the broker for entry, exit,
//! and stop fills, and advances the state machine. Status polls happen
//! outside the per-trade lock; every mutation re-reads the row under the
//! lock and silently yields when another task advanced the trade first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;

use daytrader_broker::{with_backoff, BrokerClient, OrderState, OrderTicket};
use daytrader_core::{BusEvent, EngineError, EventBus, ExitConfig, MonitorConfig};
use daytrader_data::models::TradeEventType;
use daytrader_data::{TradeRow, TradeStatus, TradeStore};
use daytrader_market_data::QuoteCache;

use crate::locks::TradeLocks;

const POLL_ATTEMPTS: u32 = 4;

/// Stop price for a filled entry: ATR-based when ATR was captured at entry,
/// percent fallback otherwise, clamped at a nickel.
#[must_use]
pub fn compute_stop_price(
    entry_price: Decimal,
    entry_atr: Option<Decimal>,
    atr_multiplier: Decimal,
    fallback_percent: Decimal,
) -> Decimal {
    let raw = match entry_atr {
        Some(atr) if atr > Decimal::ZERO => entry_price - atr_multiplier * atr,
        _ => entry_price * (Decimal::ONE - fallback_percent / Decimal::ONE_HUNDRED),
    };
    raw.round_dp(2).max(Decimal::new(5, 2))
}

pub struct OrderManager {
    broker: Arc<dyn BrokerClient>,
    store: TradeStore,
    cache: Arc<QuoteCache>,
    bus: EventBus,
    locks: Arc<TradeLocks>,
    exits: ExitConfig,
    monitors: MonitorConfig,
    cursor: AtomicUsize,
}

impl OrderManager {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: TradeStore,
        cache: Arc<QuoteCache>,
        bus: EventBus,
        locks: Arc<TradeLocks>,
        exits: ExitConfig,
        monitors: MonitorConfig,
    ) -> Self {
        Self {
            broker,
            store,
            cache,
            bus,
            locks,
            exits,
            monitors,
            cursor: AtomicUsize::new(0),
        }
    }

    /// A terminal trade no longer needs its option symbol streaming.
    fn release_symbol(&self, trade_id: i64, option_symbol: &str) {
        self.cache.unsubscribe(option_symbol);
        self.locks.release_terminal(&[trade_id]);
    }

    /// One monitor pass. Iteration rotates across ticks so no trade is
    /// starved when the per-tick cap bites.
    pub async fn tick(&self) -> Result<()> {
        let today = daytrader_core::session_date(daytrader_core::now_eastern());
        let trades = self.store.monitorable_trades(today).await?;
        if trades.is_empty() {
            return Ok(());
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % trades.len();
        let batch: Vec<TradeRow> = trades
            .iter()
            .cycle()
            .skip(start)
            .take(trades.len().min(self.monitors.max_trades_per_tick))
            .cloned()
            .collect();

        let mut invariant_failure = None;
        for trade in batch {
            let trade_id = trade.id;
            if let Err(err) = self.process(trade).await {
                if let Some(EngineError::InvariantViolation(_)) =
                    err.downcast_ref::<EngineError>()
                {
                    tracing::error!(trade_id, %err, "Invariant violation, marking trade ERROR");
                    if let Err(mark_err) = self
                        .store
                        .mark_trade_error(trade_id, &err.to_string())
                        .await
                    {
                        tracing::error!(trade_id, %mark_err, "Failed to mark trade ERROR");
                    }
                    invariant_failure.get_or_insert(err);
                } else {
                    tracing::warn!(trade_id, %err, "Order monitor pass failed for trade");
                }
            }
        }
        match invariant_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn process(&self, trade: TradeRow) -> Result<()> {
        match trade.status() {
            Some(TradeStatus::Pending) => self.check_entry(trade).await,
            Some(TradeStatus::Filled) => self.place_stop(trade).await,
            Some(TradeStatus::StopLossPlaced) => self.check_stop_order(trade).await,
            Some(TradeStatus::Exiting) => self.check_exit_fill(trade).await,
            _ => Ok(()),
        }
    }

    /// Polls the broker, tolerating transient failures: the trade stays put
    /// and the next tick retries.
    async fn poll_order(&self, order_id: &str) -> Result<Option<daytrader_broker::OrderStatusReport>> {
        match with_backoff(POLL_ATTEMPTS, || self.broker.order_status(order_id)).await {
            Ok(report) => Ok(Some(report)),
            Err(err) if err.is_transient() => {
                tracing::warn!(order_id, %err, "Order status poll exhausted retries");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn check_entry(&self, trade: TradeRow) -> Result<()> {
        let Some(order_id) = trade.entry_order_id.clone() else {
            return Err(EngineError::InvariantViolation(format!(
                "pending trade {} has no entry order id",
                trade.id
            ))
            .into());
        };
        let Some(report) = self.poll_order(&order_id).await? else {
            return Ok(());
        };

        match report.state {
            OrderState::Filled => {
                let Some(price) = report.filled_price else {
                    tracing::warn!(trade_id = trade.id, "Fill report missing price, retrying next tick");
                    return Ok(());
                };
                let filled_at = report.filled_at.unwrap_or_else(Utc::now).naive_utc();

                let filled = {
                    let _guard = self.locks.lock(trade.id).await;
                    let Some(fresh) = self.store.get_trade(trade.id).await? else {
                        return Ok(());
                    };
                    if fresh.status() != Some(TradeStatus::Pending) {
                        return Ok(());
                    }
                    self.store.record_entry_fill(trade.id, price, filled_at).await?
                };
                // Lock released before the (possibly slow) stop placement.
                self.place_stop(filled).await
            }
            OrderState::Cancelled | OrderState::Rejected | OrderState::Expired => {
                let _guard = self.locks.lock(trade.id).await;
                let Some(fresh) = self.store.get_trade(trade.id).await? else {
                    return Ok(());
                };
                if fresh.status() != Some(TradeStatus::Pending) {
                    return Ok(());
                }
                let label = format!("{:?}", report.state).to_uppercase();
                self.store.cancel_pending(trade.id, &label).await?;
                self.bus.publish(BusEvent::TradeCancelled {
                    trade_id: trade.id,
                    reason: label,
                });
                self.release_symbol(trade.id, &trade.option_symbol);
                Ok(())
            }
            OrderState::Working => self.check_entry_timeout(trade, &order_id).await,
        }
    }

    /// Cancels a limit entry still working past the timeout. The setup has
    /// expired; no replacement order is submitted.
    async fn check_entry_timeout(&self, trade: TradeRow, order_id: &str) -> Result<()> {
        let age = Utc::now().naive_utc() - trade.created_at;
        if age.num_seconds() < self.exits.entry_limit_timeout_secs {
            return Ok(());
        }

        if let Err(err) = self.broker.cancel_order(order_id).await {
            // The order may have just filled; the next tick resolves it.
            tracing::warn!(trade_id = trade.id, %err, "Could not cancel timed-out entry order");
            return Ok(());
        }

        let _guard = self.locks.lock(trade.id).await;
        let Some(fresh) = self.store.get_trade(trade.id).await? else {
            return Ok(());
        };
        if fresh.status() != Some(TradeStatus::Pending) {
            return Ok(());
        }
        self.store.cancel_pending(trade.id, "LIMIT_TIMEOUT").await?;
        tracing::info!(
            trade_id = trade.id,
            elapsed_secs = age.num_seconds(),
            "Entry limit timed out, cancelled without chasing"
        );
        self.bus.publish(BusEvent::TradeCancelled {
            trade_id: trade.id,
            reason: "LIMIT_TIMEOUT".to_string(),
        });
        self.release_symbol(trade.id, &trade.option_symbol);
        Ok(())
    }

    /// Places the protective stop for a FILLED trade. A broker rejection
    /// degrades to an app-managed stop evaluated by the exit engine.
    async fn place_stop(&self, trade: TradeRow) -> Result<()> {
        let Some(entry_price) = trade.entry_price else {
            return Err(EngineError::InvariantViolation(format!(
                "filled trade {} has no entry price",
                trade.id
            ))
            .into());
        };

        let atr_multiplier = trade
            .param_atr_stop_mult
            .unwrap_or(self.exits.atr_stop_multiplier);
        let fallback_percent = trade
            .param_stop_loss_percent
            .unwrap_or(self.exits.stop_loss_percent);
        let stop_price =
            compute_stop_price(entry_price, trade.entry_atr, atr_multiplier, fallback_percent);

        let ticket = OrderTicket::stop_exit(&trade.option_symbol, trade.quantity, stop_price);
        let stop_order_id = match with_backoff(POLL_ATTEMPTS, || self.broker.place_order(&ticket))
            .await
        {
            Ok(order_id) => Some(order_id),
            Err(err) if err.is_transient() => {
                tracing::warn!(trade_id = trade.id, %err, "Stop placement deferred to next tick");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(trade_id = trade.id, %err, "Broker rejected stop, using app-managed stop");
                None
            }
        };

        let _guard = self.locks.lock(trade.id).await;
        let Some(fresh) = self.store.get_trade(trade.id).await? else {
            return Ok(());
        };
        if fresh.status() != Some(TradeStatus::Filled) {
            // Raced with an exit; release the orphan stop order.
            if let Some(order_id) = &stop_order_id {
                if let Err(err) = self.broker.cancel_order(order_id).await {
                    tracing::warn!(trade_id = trade.id, %err, "Could not cancel orphan stop order");
                }
            }
            return Ok(());
        }

        self.store
            .record_stop_placement(trade.id, stop_order_id.as_deref(), stop_price)
            .await?;
        self.bus.publish(BusEvent::TradeFilled {
            trade_id: trade.id,
            entry_price,
            stop_loss_price: stop_price,
        });
        Ok(())
    }

    async fn check_exit_fill(&self, trade: TradeRow) -> Result<()> {
        let Some(order_id) = trade.exit_order_id.clone() else {
            return Err(EngineError::InvariantViolation(format!(
                "exiting trade {} has no exit order id",
                trade.id
            ))
            .into());
        };
        let Some(report) = self.poll_order(&order_id).await? else {
            return Ok(());
        };

        match report.state {
            OrderState::Filled => {
                let Some(price) = report.filled_price else {
                    return Ok(());
                };
                let filled_at = report.filled_at.unwrap_or_else(Utc::now).naive_utc();

                let _guard = self.locks.lock(trade.id).await;
                let Some(fresh) = self.store.get_trade(trade.id).await? else {
                    return Ok(());
                };
                if fresh.status() != Some(TradeStatus::Exiting) {
                    return Ok(());
                }
                let closed = self.store.record_exit_fill(trade.id, price, filled_at, false).await?;
                self.publish_closed(&closed);
                self.release_symbol(trade.id, &trade.option_symbol);
                Ok(())
            }
            OrderState::Rejected | OrderState::Expired | OrderState::Cancelled => {
                // A dead exit order leaves the position unprotected.
                tracing::error!(
                    trade_id = trade.id,
                    state = ?report.state,
                    "Exit order died at broker"
                );
                self.store
                    .mark_trade_error(trade.id, &format!("exit order {order_id} {:?}", report.state))
                    .await?;
                Ok(())
            }
            OrderState::Working => Ok(()),
        }
    }

    /// Watches the resting broker stop: a fill closes the trade as
    /// STOP_LOSS_HIT; any other terminal state clears `stop_active` so the
    /// exit engine takes over the stop.
    async fn check_stop_order(&self, trade: TradeRow) -> Result<()> {
        let Some(order_id) = trade.stop_order_id.clone() else {
            return Ok(());
        };
        if !trade.stop_active {
            return Ok(());
        }
        let Some(report) = self.poll_order(&order_id).await? else {
            return Ok(());
        };

        match report.state {
            OrderState::Filled => {
                let Some(price) = report.filled_price else {
                    return Ok(());
                };
                let filled_at = report.filled_at.unwrap_or_else(Utc::now).naive_utc();

                let _guard = self.locks.lock(trade.id).await;
                let Some(fresh) = self.store.get_trade(trade.id).await? else {
                    return Ok(());
                };
                if fresh.status() != Some(TradeStatus::StopLossPlaced) {
                    return Ok(());
                }
                let closed = self.store.record_exit_fill(trade.id, price, filled_at, true).await?;
                self.publish_closed(&closed);
                self.release_symbol(trade.id, &trade.option_symbol);
                Ok(())
            }
            OrderState::Cancelled | OrderState::Rejected | OrderState::Expired => {
                self.store.set_stop_inactive(trade.id).await?;
                self.store
                    .log_event(
                        trade.id,
                        TradeEventType::StopLossCancelled,
                        &format!("Broker stop {order_id} observed {:?}", report.state),
                        None,
                    )
                    .await?;
                Ok(())
            }
            OrderState::Working => Ok(()),
        }
    }

    fn publish_closed(&self, trade: &TradeRow) {
        self.bus.publish(BusEvent::TradeClosed {
            trade_id: trade.id,
            exit_price: trade.exit_price.unwrap_or(Decimal::ZERO),
            pnl_dollars: trade.pnl_dollars.unwrap_or(Decimal::ZERO),
            pnl_percent: trade.pnl_percent.unwrap_or(Decimal::ZERO),
            exit_reason: trade.exit_reason.clone().unwrap_or_default(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn atr_stop_is_primary() {
        // Entry 0.42 with ATR 0.10 and 2x multiplier: stop at 0.22.
        let stop = compute_stop_price(dec!(0.42), Some(dec!(0.10)), dec!(2), dec!(60));
        assert_eq!(stop, dec!(0.22));
    }

    #[test]
    fn percent_fallback_without_atr() {
        let stop = compute_stop_price(dec!(1.00), None, dec!(2), dec!(60));
        assert_eq!(stop, dec!(0.40));
    }

    #[test]
    fn zero_atr_uses_fallback() {
        let stop = compute_stop_price(dec!(1.00), Some(dec!(0)), dec!(2), dec!(25));
        assert_eq!(stop, dec!(0.75));
    }

    #[test]
    fn stop_clamped_at_nickel() {
        let stop = compute_stop_price(dec!(0.10), Some(dec!(0.20)), dec!(2), dec!(60));
        assert_eq!(stop, dec!(0.05));
    }

    #[test]
    fn stop_rounds_to_cents() {
        let stop = compute_stop_price(dec!(0.415), Some(dec!(0.0333)), dec!(2), dec!(60));
        assert_eq!(stop, dec!(0.35));
    }
}
