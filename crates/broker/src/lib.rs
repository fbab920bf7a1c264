pub mod client;
pub mod http;
pub mod paper;
pub mod retry;
pub mod types;

pub use client::BrokerClient;
pub use http::HttpBroker;
pub use paper::PaperBroker;
pub use retry::with_backoff;
pub use types::{
    ChainEntry, EquityQuote, Instruction, OptionRight, OrderState, OrderStatusReport, OrderTicket,
    OrderType,
};
