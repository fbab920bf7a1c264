//! Alert admission pipeline.
//!
//! Normalizes an incoming alert (webhook or internal strategy), persists
//! it, walks it through the risk gate, contract selection, confidence
//! sizing, and order placement, and books the PENDING trade. When it
//! does not, it records exactly why.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;

use daytrader_broker::{BrokerClient, OptionRight, OrderTicket};
use daytrader_core::{AppConfig, BusEvent, EngineError, EventBus, SizingConfig};
use daytrader_data::models::TradeEventType;
use daytrader_data::{
    AlertRow, ExitReason, NewTrade, TradeDirection, TradeRow, TradeStore,
};
use daytrader_market_data::{QuoteCache, QuoteKind};

use crate::locks::TradeLocks;
use crate::risk::{GateInput, GateOutcome, RiskGate};
use crate::selector::{ContractSelector, SelectedContract};

/// Confidence context attached by the confluence strategy.
#[derive(Debug, Clone, Copy)]
pub struct ConfluenceInfo {
    pub score: i32,
    pub max_score: i32,
    pub relative_volume: Option<f64>,
}

/// Per-trade exit overrides carried from the originating strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitOverrides {
    pub stop_loss_percent: Option<Decimal>,
    pub profit_target_percent: Option<Decimal>,
    pub trailing_stop_percent: Option<Decimal>,
    pub max_hold_minutes: Option<i64>,
    pub atr_stop_mult: Option<Decimal>,
}

/// A normalized alert entering the pipeline.
#[derive(Debug, Clone)]
pub struct IncomingAlert {
    pub ticker: String,
    /// "BUY_CALL" | "BUY_PUT" | "CLOSE"
    pub action: String,
    pub price: Option<Decimal>,
    pub secret: Option<String>,
    pub raw_payload: String,
    /// "external" | "internal_strategy" | "manual_test" | "retake"
    pub source: String,
    pub confluence: Option<ConfluenceInfo>,
    pub exit_overrides: ExitOverrides,
    /// ATR at signal time, for the ATR-based stop.
    pub entry_atr: Option<Decimal>,
}

impl IncomingAlert {
    #[must_use]
    pub fn direction(&self) -> Option<TradeDirection> {
        match self.action.as_str() {
            "BUY_CALL" => Some(TradeDirection::Call),
            "BUY_PUT" => Some(TradeDirection::Put),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        self.action == "CLOSE"
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        self.source == "external"
    }
}

/// Tagged admission outcome. The pipeline never throws for business
/// rejections; only infrastructure failures surface as errors.
#[derive(Debug, Clone)]
pub enum Admission {
    Accepted { trade_id: i64, message: String },
    Rejected { reason: String, message: String },
    Errored { message: String },
}

pub struct AdmissionPipeline {
    store: TradeStore,
    gate: RiskGate,
    selector: ContractSelector,
    broker: Arc<dyn BrokerClient>,
    cache: Arc<QuoteCache>,
    bus: EventBus,
    locks: Arc<TradeLocks>,
    config: AppConfig,
}

/// Confidence-based sizing: strong confluence with elevated volume doubles
/// the base quantity; weak confluence halves it (floor one contract).
#[must_use]
pub fn confidence_quantity(
    base: i32,
    confluence: Option<&ConfluenceInfo>,
    sizing: &SizingConfig,
) -> i32 {
    let Some(info) = confluence else {
        return base;
    };
    let rel_vol = info.relative_volume.unwrap_or(0.0);
    if info.score >= sizing.double_min_score && rel_vol >= sizing.double_min_rel_vol {
        base * 2
    } else if info.score <= sizing.half_max_score {
        (base / 2).max(1)
    } else {
        base
    }
}

impl AdmissionPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: TradeStore,
        gate: RiskGate,
        selector: ContractSelector,
        broker: Arc<dyn BrokerClient>,
        cache: Arc<QuoteCache>,
        bus: EventBus,
        locks: Arc<TradeLocks>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            gate,
            selector,
            broker,
            cache,
            bus,
            locks,
            config,
        }
    }

    /// Runs an alert through the full admission path.
    pub async fn process(&self, incoming: IncomingAlert) -> Result<Admission> {
        let now_et = daytrader_core::now_eastern();
        let session_date = daytrader_core::session_date(now_et);

        // 1. Persist as RECEIVED.
        let alert = self
            .store
            .create_alert(
                &incoming.raw_payload,
                &incoming.ticker.to_uppercase(),
                incoming.direction(),
                incoming.price,
                &incoming.source,
            )
            .await?;
        self.bus.publish(BusEvent::AlertReceived {
            alert_id: alert.id,
            ticker: alert.ticker.clone(),
            action: incoming.action.clone(),
        });

        // 2. Risk gate.
        let gate_input = GateInput {
            alert_id: alert.id,
            ticker: alert.ticker.clone(),
            direction: incoming.direction(),
            is_close: incoming.is_close(),
            provided_secret: incoming.secret.clone(),
            external: incoming.is_external(),
        };
        if let GateOutcome::Reject { reason, message } =
            self.gate.evaluate(&gate_input, now_et).await?
        {
            if reason == crate::risk::RejectReason::InvalidSecret {
                self.store.reject_alert(alert.id, message.as_str()).await?;
                return Err(EngineError::Auth.into());
            }
            self.store.reject_alert(alert.id, reason.code()).await?;
            tracing::info!(alert_id = alert.id, reason = reason.code(), "Alert rejected");
            return Ok(Admission::Rejected {
                reason: reason.code().to_string(),
                message,
            });
        }

        if incoming.is_close() {
            return self.process_close(&alert).await;
        }

        let Some(direction) = incoming.direction() else {
            self.store
                .mark_alert_error(alert.id, "unknown action")
                .await?;
            return Ok(Admission::Errored {
                message: format!("Unknown action {}", incoming.action),
            });
        };

        // Reverse signal: an opposite open position is closed before the
        // new trade is admitted.
        if let Some(open) = self
            .store
            .active_trade_for_ticker(session_date, &alert.ticker)
            .await?
        {
            if open.direction.as_str() != direction.as_str()
                && open.status().is_some_and(daytrader_data::TradeStatus::is_open_position)
            {
                tracing::info!(
                    trade_id = open.id,
                    incoming = direction.as_str(),
                    "Reverse signal, closing open position"
                );
                self.close_trade(
                    &open,
                    &format!(
                        "Reverse signal: closing {} for incoming {}",
                        open.direction, direction
                    ),
                    ExitReason::Signal,
                    TradeEventType::CloseSignal,
                )
                .await?;
            }
        }

        // 3. Contract selection.
        let underlying_price = match incoming.price {
            Some(price) => price,
            None => match self.broker.equity_quote(&alert.ticker).await {
                Ok(quote) => quote.last,
                Err(err) => {
                    self.store
                        .mark_alert_error(alert.id, &format!("no underlying price: {err}"))
                        .await?;
                    return Ok(Admission::Errored {
                        message: format!("Could not price {}: {err}", alert.ticker),
                    });
                }
            },
        };
        let right = match direction {
            TradeDirection::Call => OptionRight::Call,
            TradeDirection::Put => OptionRight::Put,
        };
        let contract = match self
            .selector
            .select(&alert.ticker, right, underlying_price, session_date)
            .await
        {
            Ok(contract) => contract,
            Err(err @ EngineError::NoLiquidContract(_)) => {
                self.store.mark_alert_error(alert.id, &err.to_string()).await?;
                return Ok(Admission::Errored {
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        // 4. Quantity with confidence sizing.
        let quantity = confidence_quantity(
            self.config.sizing.default_quantity,
            incoming.confluence.as_ref(),
            &self.config.sizing,
        );

        // 5. Entry limit order at the ask.
        let ticket = OrderTicket::limit_entry(&contract.symbol, quantity, contract.ask);
        let order_id = match self.broker.place_order(&ticket).await {
            Ok(order_id) => order_id,
            Err(err) if err.is_transient() => {
                self.store
                    .mark_alert_error(alert.id, &format!("entry order failed: {err}"))
                    .await?;
                return Ok(Admission::Errored {
                    message: format!("Entry order failed: {err}"),
                });
            }
            Err(err) => {
                self.store.mark_alert_error(alert.id, &err.to_string()).await?;
                return Ok(Admission::Errored {
                    message: err.to_string(),
                });
            }
        };

        // 6. Book the PENDING trade with its admission ledger.
        let trade = self
            .promote(&alert, &incoming, direction, &contract, quantity, &order_id, session_date)
            .await?;

        // Keep the option symbol streaming while the trade lives.
        self.cache.subscribe(&contract.symbol, QuoteKind::Option);

        // 7. Notify subscribers.
        self.bus.publish(BusEvent::TradeCreated {
            trade_id: trade.id,
            direction: direction.as_str().to_string(),
            option_symbol: contract.symbol.clone(),
            strike: contract.strike,
            status: trade.status.clone(),
        });

        let message = format!(
            "Trade #{} placed: {} {}x at ${:.2}",
            trade.id, contract.symbol, quantity, contract.ask
        );
        tracing::info!(trade_id = trade.id, "{message}");
        Ok(Admission::Accepted {
            trade_id: trade.id,
            message,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn promote(
        &self,
        alert: &AlertRow,
        incoming: &IncomingAlert,
        direction: TradeDirection,
        contract: &SelectedContract,
        quantity: i32,
        order_id: &str,
        session_date: NaiveDate,
    ) -> Result<TradeRow> {
        let overrides = incoming.exit_overrides;
        let new_trade = NewTrade {
            trade_date: session_date,
            ticker: alert.ticker.clone(),
            direction,
            option_symbol: contract.symbol.clone(),
            strike_price: contract.strike,
            expiration_date: contract.expiry,
            quantity,
            entry_order_id: order_id.to_string(),
            source: incoming.source.clone(),
            entry_atr: incoming.entry_atr,
            param_stop_loss_percent: overrides.stop_loss_percent,
            param_profit_target_percent: overrides.profit_target_percent,
            param_trailing_stop_percent: overrides.trailing_stop_percent,
            param_max_hold_minutes: overrides.max_hold_minutes,
            param_atr_stop_mult: overrides.atr_stop_mult,
        };

        let events = vec![
            (
                TradeEventType::AlertReceived,
                format!(
                    "Signal received: {} {} at {}",
                    incoming.action,
                    alert.ticker,
                    incoming
                        .price
                        .map_or_else(|| "market".to_string(), |p| format!("${p:.2}")),
                ),
                Some(json!({
                    "action": incoming.action,
                    "ticker": alert.ticker,
                    "source": incoming.source,
                })),
            ),
            (
                TradeEventType::ContractSelected,
                format!(
                    "Selected {} strike=${} delta={:.2}",
                    contract.symbol, contract.strike, contract.delta
                ),
                Some(json!({
                    "symbol": contract.symbol,
                    "strike": contract.strike,
                    "delta": contract.delta,
                    "bid": contract.bid,
                    "ask": contract.ask,
                    "spread_percent": contract.spread_percent,
                })),
            ),
            (
                TradeEventType::EntryOrderPlaced,
                format!(
                    "Buy {quantity}x at ${:.2} limit, timeout={}s, order={order_id}",
                    contract.ask, self.config.exits.entry_limit_timeout_secs
                ),
                Some(json!({
                    "order_id": order_id,
                    "limit_price": contract.ask,
                    "quantity": quantity,
                    "confluence_score": incoming.confluence.map(|c| c.score),
                    "relative_volume": incoming.confluence.and_then(|c| c.relative_volume),
                })),
            ),
        ];

        self.store
            .promote_alert_to_trade(alert.id, &new_trade, &events)
            .await
    }

    /// CLOSE action: flatten the most recent open position at market.
    async fn process_close(&self, alert: &AlertRow) -> Result<Admission> {
        let session_date = daytrader_core::session_date(daytrader_core::now_eastern());
        let open = self.store.open_position_trades(session_date).await?;
        let Some(trade) = open.last() else {
            // The gate already screens for this; guard against the race.
            self.store.reject_alert(alert.id, "no_open_position").await?;
            return Ok(Admission::Rejected {
                reason: "no_open_position".to_string(),
                message: "No open positions to close".to_string(),
            });
        };

        self.close_trade(trade, "CLOSE signal received", ExitReason::Signal, TradeEventType::CloseSignal)
            .await?;
        self.store.mark_alert_processed(alert.id, trade.id).await?;

        Ok(Admission::Accepted {
            trade_id: trade.id,
            message: format!("Closing trade #{}: {}", trade.id, trade.option_symbol),
        })
    }

    /// Flattens the most recent open position on an operator request.
    pub async fn manual_close(&self) -> Result<Admission> {
        let session_date = daytrader_core::session_date(daytrader_core::now_eastern());
        let open = self.store.open_position_trades(session_date).await?;
        let Some(trade) = open.last() else {
            return Ok(Admission::Rejected {
                reason: "no_open_position".to_string(),
                message: "No open positions to close".to_string(),
            });
        };

        self.close_trade(trade, "Manual close requested", ExitReason::Manual, TradeEventType::ManualClose)
            .await?;
        Ok(Admission::Accepted {
            trade_id: trade.id,
            message: format!("Closing trade #{}: {}", trade.id, trade.option_symbol),
        })
    }

    /// Re-enters the direction of a finished trade with a fresh contract.
    /// The retake runs the full admission path, carrying the original's
    /// exit-parameter overrides.
    pub async fn retake(&self, trade_id: i64) -> Result<Admission> {
        let Some(original) = self.store.get_trade(trade_id).await? else {
            return Ok(Admission::Rejected {
                reason: "not_found".to_string(),
                message: format!("Trade #{trade_id} not found"),
            });
        };
        if !original.status().is_some_and(daytrader_data::TradeStatus::is_terminal) {
            return Ok(Admission::Rejected {
                reason: "not_terminal".to_string(),
                message: format!(
                    "Trade #{trade_id} is {}, must be closed or cancelled first",
                    original.status
                ),
            });
        }

        let action = match original.direction() {
            Some(TradeDirection::Call) => "BUY_CALL",
            Some(TradeDirection::Put) => "BUY_PUT",
            None => {
                return Ok(Admission::Errored {
                    message: format!("Trade #{trade_id} has unknown direction"),
                })
            }
        };

        let incoming = IncomingAlert {
            ticker: original.ticker.clone(),
            action: action.to_string(),
            price: None,
            secret: None,
            raw_payload: json!({
                "source": "retake",
                "original_trade_id": original.id,
                "ticker": original.ticker,
                "action": action,
            })
            .to_string(),
            source: "retake".to_string(),
            confluence: None,
            exit_overrides: ExitOverrides {
                stop_loss_percent: original.param_stop_loss_percent,
                profit_target_percent: original.param_profit_target_percent,
                trailing_stop_percent: original.param_trailing_stop_percent,
                max_hold_minutes: original.param_max_hold_minutes,
                atr_stop_mult: original.param_atr_stop_mult,
            },
            entry_atr: None,
        };
        self.process(incoming).await
    }

    /// Cancels the resting stop and places a market sell, under the
    /// per-trade lock. Shared by CLOSE alerts, reverse signals, and
    /// manual closes.
    async fn close_trade(
        &self,
        trade: &TradeRow,
        cause: &str,
        reason: ExitReason,
        event_type: TradeEventType,
    ) -> Result<()> {
        let _guard = self.locks.lock(trade.id).await;
        let Some(fresh) = self.store.get_trade(trade.id).await? else {
            return Ok(());
        };
        if !fresh.status().is_some_and(daytrader_data::TradeStatus::is_open_position) {
            return Ok(());
        }

        self.store.log_event(fresh.id, event_type, cause, None).await?;

        if fresh.stop_active {
            if let Some(stop_order_id) = &fresh.stop_order_id {
                match self.broker.cancel_order(stop_order_id).await {
                    Ok(()) => {
                        self.store
                            .log_event(
                                fresh.id,
                                TradeEventType::StopLossCancelled,
                                &format!("Stop order {stop_order_id} cancelled"),
                                None,
                            )
                            .await?;
                    }
                    Err(err) => {
                        tracing::warn!(trade_id = fresh.id, %err, "Could not cancel stop order");
                    }
                }
            }
        }

        let ticket = OrderTicket::market_exit(&fresh.option_symbol, fresh.quantity);
        let order_id = self.broker.place_order(&ticket).await?;
        self.store
            .record_exit_trigger(
                fresh.id,
                reason,
                &order_id,
                cause,
                &format!("Market sell {}x placed, order={order_id}", fresh.quantity),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizing() -> SizingConfig {
        SizingConfig {
            default_quantity: 2,
            double_min_score: 5,
            double_min_rel_vol: 2.0,
            half_max_score: 3,
        }
    }

    #[test]
    fn strong_confluence_doubles() {
        let info = ConfluenceInfo {
            score: 6,
            max_score: 6,
            relative_volume: Some(2.5),
        };
        assert_eq!(confidence_quantity(2, Some(&info), &sizing()), 4);
    }

    #[test]
    fn strong_score_without_volume_stays_base() {
        let info = ConfluenceInfo {
            score: 6,
            max_score: 6,
            relative_volume: Some(1.2),
        };
        assert_eq!(confidence_quantity(2, Some(&info), &sizing()), 2);
    }

    #[test]
    fn weak_confluence_halves_with_floor() {
        let info = ConfluenceInfo {
            score: 3,
            max_score: 6,
            relative_volume: Some(1.0),
        };
        assert_eq!(confidence_quantity(2, Some(&info), &sizing()), 1);
        assert_eq!(confidence_quantity(1, Some(&info), &sizing()), 1);
        assert_eq!(confidence_quantity(6, Some(&info), &sizing()), 3);
    }

    #[test]
    fn no_confluence_keeps_base() {
        assert_eq!(confidence_quantity(2, None, &sizing()), 2);
    }

    #[test]
    fn mid_band_score_keeps_base() {
        let info = ConfluenceInfo {
            score: 4,
            max_score: 6,
            relative_volume: Some(3.0),
        };
        assert_eq!(confidence_quantity(2, Some(&info), &sizing()), 2);
    }

    #[test]
    fn incoming_alert_direction_parsing() {
        let mut alert = IncomingAlert {
            ticker: "SPY".to_string(),
            action: "BUY_CALL".to_string(),
            price: None,
            secret: None,
            raw_payload: String::new(),
            source: "external".to_string(),
            confluence: None,
            exit_overrides: ExitOverrides::default(),
            entry_atr: None,
        };
        assert_eq!(alert.direction(), Some(TradeDirection::Call));
        alert.action = "BUY_PUT".to_string();
        assert_eq!(alert.direction(), Some(TradeDirection::Put));
        alert.action = "CLOSE".to_string();
        assert_eq!(alert.direction(), None);
        assert!(alert.is_close());
    }
}
