//! REST broker client.
//!
//! Every call carries the configured deadline and passes through a local
//! rate limiter so bursts from concurrent monitors cannot trip the broker's
//! request caps.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use daytrader_core::{BrokerConfig, EngineError, Result};

use crate::client::BrokerClient;
use crate::types::{
    ChainEntry, EquityQuote, OptionRight, OrderState, OrderStatusReport, OrderTicket, OrderType,
};

pub struct HttpBroker {
    http: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl HttpBroker {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &BrokerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let per_sec =
            NonZeroU32::new(config.rate_limit_per_sec).unwrap_or(nonzero!(5u32));
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_second(per_sec)),
        })
    }

    fn map_send_error(err: reqwest::Error) -> EngineError {
        if err.is_timeout() || err.is_connect() {
            EngineError::TransientBroker(format!("request failed: {err}"))
        } else {
            EngineError::TransientBroker(format!("transport error: {err}"))
        }
    }

    fn check_status(status: reqwest::StatusCode, body: &str) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(EngineError::TransientBroker(format!(
                "broker returned {status}: {body}"
            )));
        }
        Err(EngineError::PermanentBroker(format!(
            "broker returned {status}: {body}"
        )))
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<String> {
        self.limiter.until_ready().await;
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(Self::map_send_error)?;
        Self::check_status(status, &text)?;
        Ok(text)
    }

    async fn get_json(&self, path: &str) -> Result<String> {
        self.limiter.until_ready().await;
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(Self::map_send_error)?;
        Self::check_status(status, &text)?;
        Ok(text)
    }

    fn ticket_payload(ticket: &OrderTicket) -> serde_json::Value {
        let mut order = json!({
            "orderType": ticket.order_type.label(),
            "session": "NORMAL",
            "duration": "DAY",
            "orderStrategyType": "SINGLE",
            "orderLegCollection": [{
                "instruction": match ticket.instruction {
                    crate::types::Instruction::BuyToOpen => "BUY_TO_OPEN",
                    crate::types::Instruction::SellToClose => "SELL_TO_CLOSE",
                },
                "quantity": ticket.quantity,
                "instrument": {
                    "symbol": ticket.option_symbol,
                    "assetType": "OPTION",
                },
            }],
        });
        match ticket.order_type {
            OrderType::Limit { price } => {
                order["price"] = json!(price.to_string());
            }
            OrderType::Stop { stop_price } => {
                order["stopPrice"] = json!(stop_price.to_string());
            }
            OrderType::Market => {}
        }
        order
    }

    fn parse<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
        serde_json::from_str(text)
            .map_err(|e| EngineError::PermanentBroker(format!("unparseable broker response: {e}")))
    }
}

#[derive(Deserialize)]
struct PlacedOrder {
    order_id: String,
}

#[derive(Deserialize)]
struct OrderStatusBody {
    status: String,
    filled_price: Option<Decimal>,
    filled_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Deserialize)]
struct ChainBody {
    contracts: Vec<ChainEntry>,
}

#[derive(Deserialize)]
struct QuoteBody {
    last: Decimal,
    bid: Decimal,
    ask: Decimal,
    change: Decimal,
    change_percent: f64,
}

fn parse_order_state(raw: &str) -> OrderState {
    match raw.to_ascii_uppercase().as_str() {
        "FILLED" => OrderState::Filled,
        "CANCELED" | "CANCELLED" => OrderState::Cancelled,
        "REJECTED" => OrderState::Rejected,
        "EXPIRED" => OrderState::Expired,
        _ => OrderState::Working,
    }
}

#[async_trait]
impl BrokerClient for HttpBroker {
    async fn place_order(&self, ticket: &OrderTicket) -> Result<String> {
        let text = self
            .post_json("/v1/orders", Self::ticket_payload(ticket))
            .await?;
        let placed: PlacedOrder = Self::parse(&text)?;
        tracing::info!(
            order_id = placed.order_id,
            symbol = ticket.option_symbol,
            order_type = ticket.order_type.label(),
            quantity = ticket.quantity,
            "Order placed"
        );
        Ok(placed.order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.limiter.until_ready().await;
        let resp = self
            .http
            .delete(format!("{}/v1/orders/{order_id}", self.base_url))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(Self::map_send_error)?;
        Self::check_status(status, &text)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport> {
        let text = self.get_json(&format!("/v1/orders/{order_id}")).await?;
        let body: OrderStatusBody = Self::parse(&text)?;
        Ok(OrderStatusReport {
            order_id: order_id.to_string(),
            state: parse_order_state(&body.status),
            filled_price: body.filled_price,
            filled_at: body.filled_at,
        })
    }

    async fn option_chain(
        &self,
        underlying: &str,
        right: OptionRight,
        strike_count: u32,
        expiry: NaiveDate,
    ) -> Result<Vec<ChainEntry>> {
        let path = format!(
            "/v1/chains?symbol={underlying}&contractType={}&strikeCount={strike_count}&fromDate={expiry}&toDate={expiry}",
            right.as_str()
        );
        let text = self.get_json(&path).await?;
        let body: ChainBody = Self::parse(&text)?;
        Ok(body.contracts)
    }

    async fn equity_quote(&self, symbol: &str) -> Result<EquityQuote> {
        let text = self.get_json(&format!("/v1/quotes/{symbol}")).await?;
        let body: QuoteBody = Self::parse(&text)?;
        Ok(EquityQuote {
            symbol: symbol.to_string(),
            last: body.last,
            bid: body.bid,
            ask: body.ask,
            change: body.change,
            change_percent: body.change_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_state_parsing_covers_broker_spellings() {
        assert_eq!(parse_order_state("FILLED"), OrderState::Filled);
        assert_eq!(parse_order_state("CANCELED"), OrderState::Cancelled);
        assert_eq!(parse_order_state("cancelled"), OrderState::Cancelled);
        assert_eq!(parse_order_state("QUEUED"), OrderState::Working);
    }

    #[test]
    fn ticket_payload_conveys_semantics() {
        use rust_decimal_macros::dec;
        let ticket = OrderTicket::stop_exit("SPY 260302C00694000", 2, dec!(0.22));
        let payload = HttpBroker::ticket_payload(&ticket);
        assert_eq!(payload["orderType"], "STOP");
        assert_eq!(payload["duration"], "DAY");
        assert_eq!(payload["session"], "NORMAL");
        assert_eq!(payload["stopPrice"], "0.22");
        let leg = &payload["orderLegCollection"][0];
        assert_eq!(leg["instruction"], "SELL_TO_CLOSE");
        assert_eq!(leg["instrument"]["assetType"], "OPTION");
    }
}
