pub mod database;
pub mod models;
pub mod strategy_repo;
pub mod trade_store;

pub use database::Database;
pub use models::{
    compute_pnl, AlertRow, AlertStatus, DailySummaryRow, EnabledStrategyRow, ExitReason,
    FavoriteRow, NewTrade, PriceSnapshotRow, TradeDirection, TradeEventRow, TradeEventType,
    TradeRow, TradeStatus,
};
pub use strategy_repo::StrategyRepository;
pub use trade_store::TradeStore;
