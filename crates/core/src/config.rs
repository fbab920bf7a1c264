use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub exits: ExitConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub monitors: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in webhook payloads.
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub api_url: String,
    pub ws_url: String,
    /// Per-request deadline for REST calls.
    pub request_timeout_secs: u64,
    /// Max outbound requests per second.
    pub rate_limit_per_sec: u32,
    /// Route orders through the deterministic paper simulator.
    pub paper_trade: bool,
}

/// Trading-session time boundaries, all in the market's local zone (ET).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub first_entry: String,
    pub last_entry: String,
    pub force_exit: String,
    /// Afternoon cutoff used by the event-calendar block.
    pub afternoon_cutoff: String,
    pub event_calendar_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            first_entry: "10:00".to_string(),
            last_entry: "14:45".to_string(),
            force_exit: "15:00".to_string(),
            afternoon_cutoff: "12:00".to_string(),
            event_calendar_path: "config/event_calendar.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub allowed_tickers: Vec<String>,
    pub max_daily_trades: u32,
    pub max_daily_loss: Decimal,
    pub max_consecutive_losses: u32,
    /// VIX level at or above which all new entries are blocked.
    pub vix_circuit_breaker: Decimal,
    pub vix_symbol: String,
    /// Minimum minutes between trades on the same ticker.
    pub trade_cooldown_minutes: i64,
    /// Reject a directional alert when an opposite one arrived this recently.
    pub signal_debounce_minutes: i64,
    /// Window for ignoring identical duplicate alerts.
    pub dedup_window_seconds: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            allowed_tickers: vec!["SPY".to_string(), "QQQ".to_string()],
            max_daily_trades: 10,
            max_daily_loss: Decimal::from(700),
            max_consecutive_losses: 3,
            vix_circuit_breaker: Decimal::from(28),
            vix_symbol: "$VIX.X".to_string(),
            trade_cooldown_minutes: 5,
            signal_debounce_minutes: 2,
            dedup_window_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub delta_target: f64,
    pub max_spread_percent: f64,
    pub strike_count: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            delta_target: 0.40,
            max_spread_percent: 10.0,
            strike_count: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Fallback stop distance when no ATR is available at entry.
    pub stop_loss_percent: Decimal,
    pub atr_stop_multiplier: Decimal,
    pub atr_period: usize,
    pub profit_target_percent: Decimal,
    pub trailing_stop_percent: Decimal,
    pub max_hold_minutes: i64,
    /// Cancel an unfilled entry limit order after this long.
    pub entry_limit_timeout_secs: i64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_percent: Decimal::from(60),
            atr_stop_multiplier: Decimal::TWO,
            atr_period: 14,
            profit_target_percent: Decimal::from(40),
            trailing_stop_percent: Decimal::from(20),
            max_hold_minutes: 90,
            entry_limit_timeout_secs: 60,
        }
    }
}

/// Confidence-based position sizing from confluence signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    pub default_quantity: i32,
    pub double_min_score: i32,
    pub double_min_rel_vol: f64,
    pub half_max_score: i32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_quantity: 2,
            double_min_score: 5,
            double_min_rel_vol: 2.0,
            half_max_score: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub order_poll_interval_secs: u64,
    pub exit_check_interval_secs: u64,
    pub max_trades_per_tick: usize,
    /// Minimum seconds between persisted price snapshots per trade.
    pub snapshot_interval_secs: i64,
    pub quote_stale_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            order_poll_interval_secs: 5,
            exit_check_interval_secs: 10,
            max_trades_per_tick: 64,
            snapshot_interval_secs: 15,
            quote_stale_secs: 5,
        }
    }
}

/// Runtime-mutable operator overrides. The immutable [`AppConfig`] is fixed at
/// startup; only these two flags can change while the system is live.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Overrides {
    /// Admit alerts outside the configured session windows.
    pub ignore_session_windows: bool,
    /// Exit with MARKET orders instead of LIMIT.
    pub use_market_exits: bool,
}

pub type SharedOverrides = Arc<RwLock<Overrides>>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn risk_defaults_match_deployed_values() {
        let risk = RiskConfig::default();
        assert_eq!(risk.max_daily_trades, 10);
        assert_eq!(risk.max_daily_loss, dec!(700));
        assert_eq!(risk.max_consecutive_losses, 3);
        assert_eq!(risk.vix_circuit_breaker, dec!(28));
        assert!(risk.allowed_tickers.contains(&"SPY".to_string()));
    }

    #[test]
    fn exit_defaults() {
        let exits = ExitConfig::default();
        assert_eq!(exits.atr_stop_multiplier, dec!(2));
        assert_eq!(exits.profit_target_percent, dec!(40));
        assert_eq!(exits.trailing_stop_percent, dec!(20));
        assert_eq!(exits.max_hold_minutes, 90);
        assert_eq!(exits.entry_limit_timeout_secs, 60);
    }

    #[test]
    fn overrides_start_disabled() {
        let overrides = Overrides::default();
        assert!(!overrides.ignore_session_windows);
        assert!(!overrides.use_market_exits);
    }
}
