use async_trait::async_trait;
use chrono::NaiveDate;
use daytrader_core::Result;

use crate::types::{ChainEntry, EquityQuote, OptionRight, OrderStatusReport, OrderTicket};

/// Typed operations against the external broker.
///
/// All network calls carry a deadline; implementations surface transient
/// failures (`EngineError::TransientBroker`) distinctly from protocol
/// rejections (`EngineError::PermanentBroker`).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Submits an order and returns the broker-assigned order id.
    async fn place_order(&self, ticket: &OrderTicket) -> Result<String>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport>;

    /// Chain rows of the given right for one expiration, `strike_count`
    /// strikes around at-the-money.
    async fn option_chain(
        &self,
        underlying: &str,
        right: OptionRight,
        strike_count: u32,
        expiry: NaiveDate,
    ) -> Result<Vec<ChainEntry>>;

    async fn equity_quote(&self, symbol: &str) -> Result<EquityQuote>;
}
