pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod session;

pub use config::{
    AppConfig, BrokerConfig, DatabaseConfig, ExitConfig, MonitorConfig, Overrides, RiskConfig,
    SelectorConfig, ServerConfig, SessionConfig, SharedOverrides, SizingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{EngineError, Result};
pub use events::{BusEvent, EventBus, EventSubscriber};
pub use session::{from_naive_utc, market_close, market_open, now_eastern, session_date, to_eastern};
