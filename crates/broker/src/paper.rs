//! Paper trading simulator.
//!
//! Deterministic fills for testing the full pipeline without a live broker:
//! limit and market orders fill immediately (limit at the limit price,
//! market at the injected mark), stop orders rest in WORKING forever unless
//! a test trips them explicitly.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use daytrader_core::{EngineError, Result};

use crate::client::BrokerClient;
use crate::types::{
    ChainEntry, EquityQuote, OptionRight, OrderState, OrderStatusReport, OrderTicket, OrderType,
};

#[derive(Debug, Clone)]
struct SimOrder {
    ticket: OrderTicket,
    state: OrderState,
    filled_price: Option<Decimal>,
    filled_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Default)]
struct PaperState {
    orders: HashMap<String, SimOrder>,
    marks: HashMap<String, Decimal>,
    chains: HashMap<String, Vec<ChainEntry>>,
    quotes: HashMap<String, EquityQuote>,
    next_id: u64,
}

#[derive(Default)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mark price used to fill market orders for a symbol.
    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.state.lock().marks.insert(symbol.to_string(), price);
    }

    /// Seeds the chain returned for an underlying.
    pub fn set_chain(&self, underlying: &str, right: OptionRight, entries: Vec<ChainEntry>) {
        let key = format!("{underlying}:{right}");
        self.state.lock().chains.insert(key, entries);
    }

    pub fn set_quote(&self, quote: EquityQuote) {
        self.state.lock().quotes.insert(quote.symbol.clone(), quote);
    }

    /// Forces a resting stop order to fill at the given price, simulating
    /// the broker tripping the stop.
    pub fn trip_stop(&self, order_id: &str, fill_price: Decimal) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(order_id) {
            order.state = OrderState::Filled;
            order.filled_price = Some(fill_price);
            order.filled_at = Some(Utc::now());
        }
    }

    #[must_use]
    pub fn order_state(&self, order_id: &str) -> Option<OrderState> {
        self.state.lock().orders.get(order_id).map(|o| o.state)
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn place_order(&self, ticket: &OrderTicket) -> Result<String> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let order_id = format!("PAPER-{}", state.next_id);

        let (order_state, filled_price) = match ticket.order_type {
            OrderType::Limit { price } => (OrderState::Filled, Some(price)),
            OrderType::Market => {
                let mark = state.marks.get(&ticket.option_symbol).copied();
                (OrderState::Filled, Some(mark.unwrap_or(Decimal::ZERO)))
            }
            OrderType::Stop { .. } => (OrderState::Working, None),
        };

        let filled_at = filled_price.map(|_| Utc::now());
        tracing::info!(
            order_id,
            symbol = ticket.option_symbol,
            order_type = ticket.order_type.label(),
            state = ?order_state,
            "Paper order placed"
        );

        state.orders.insert(
            order_id.clone(),
            SimOrder {
                ticket: ticket.clone(),
                state: order_state,
                filled_price,
                filled_at,
            },
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.orders.get_mut(order_id) {
            Some(order) if order.state == OrderState::Working => {
                order.state = OrderState::Cancelled;
                tracing::info!(order_id, symbol = order.ticket.option_symbol, "Paper order cancelled");
                Ok(())
            }
            Some(order) => Err(EngineError::PermanentBroker(format!(
                "order {order_id} is {:?}, cannot cancel",
                order.state
            ))),
            None => Err(EngineError::PermanentBroker(format!(
                "unknown order {order_id}"
            ))),
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport> {
        let state = self.state.lock();
        let order = state.orders.get(order_id).ok_or_else(|| {
            EngineError::PermanentBroker(format!("unknown order {order_id}"))
        })?;
        Ok(OrderStatusReport {
            order_id: order_id.to_string(),
            state: order.state,
            filled_price: order.filled_price,
            filled_at: order.filled_at,
        })
    }

    async fn option_chain(
        &self,
        underlying: &str,
        right: OptionRight,
        _strike_count: u32,
        _expiry: NaiveDate,
    ) -> Result<Vec<ChainEntry>> {
        let key = format!("{underlying}:{right}");
        Ok(self.state.lock().chains.get(&key).cloned().unwrap_or_default())
    }

    async fn equity_quote(&self, symbol: &str) -> Result<EquityQuote> {
        self.state
            .lock()
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::TransientBroker(format!("no quote for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn limit_orders_fill_at_limit_price() {
        let broker = PaperBroker::new();
        let id = broker
            .place_order(&OrderTicket::limit_entry("SPY 260302C00694000", 1, dec!(0.42)))
            .await
            .unwrap();
        let status = broker.order_status(&id).await.unwrap();
        assert_eq!(status.state, OrderState::Filled);
        assert_eq!(status.filled_price, Some(dec!(0.42)));
    }

    #[tokio::test]
    async fn stop_orders_stay_working() {
        let broker = PaperBroker::new();
        let id = broker
            .place_order(&OrderTicket::stop_exit("SPY 260302C00694000", 1, dec!(0.22)))
            .await
            .unwrap();
        let status = broker.order_status(&id).await.unwrap();
        assert_eq!(status.state, OrderState::Working);
        assert_eq!(status.filled_price, None);
    }

    #[tokio::test]
    async fn market_orders_fill_at_mark() {
        let broker = PaperBroker::new();
        broker.set_mark("SPY 260302C00694000", dec!(0.51));
        let id = broker
            .place_order(&OrderTicket::market_exit("SPY 260302C00694000", 1))
            .await
            .unwrap();
        let status = broker.order_status(&id).await.unwrap();
        assert_eq!(status.filled_price, Some(dec!(0.51)));
    }

    #[tokio::test]
    async fn cancel_working_then_filled() {
        let broker = PaperBroker::new();
        let stop = broker
            .place_order(&OrderTicket::stop_exit("X", 1, dec!(0.22)))
            .await
            .unwrap();
        broker.cancel_order(&stop).await.unwrap();
        assert_eq!(broker.order_state(&stop), Some(OrderState::Cancelled));

        let filled = broker
            .place_order(&OrderTicket::limit_entry("X", 1, dec!(0.42)))
            .await
            .unwrap();
        assert!(broker.cancel_order(&filled).await.is_err());
    }

    #[tokio::test]
    async fn trip_stop_fills_at_given_price() {
        let broker = PaperBroker::new();
        let stop = broker
            .place_order(&OrderTicket::stop_exit("X", 1, dec!(0.22)))
            .await
            .unwrap();
        broker.trip_stop(&stop, dec!(0.22));
        let status = broker.order_status(&stop).await.unwrap();
        assert_eq!(status.state, OrderState::Filled);
        assert_eq!(status.filled_price, Some(dec!(0.22)));
    }
}
