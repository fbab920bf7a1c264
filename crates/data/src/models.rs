//! Persisted entities. Enum-valued columns are stored as TEXT; the enums
//! here own the canonical spellings and row structs keep the raw strings.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(AlertStatus {
    Received => "RECEIVED",
    Accepted => "ACCEPTED",
    Rejected => "REJECTED",
    Processed => "PROCESSED",
    Error => "ERROR",
});

text_enum!(TradeStatus {
    Pending => "PENDING",
    Filled => "FILLED",
    StopLossPlaced => "STOP_LOSS_PLACED",
    Exiting => "EXITING",
    Closed => "CLOSED",
    Cancelled => "CANCELLED",
    Error => "ERROR",
});

impl TradeStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled | Self::Error)
    }

    /// Statuses holding a live position (entry filled, not yet closed).
    #[must_use]
    pub const fn is_open_position(self) -> bool {
        matches!(self, Self::Filled | Self::StopLossPlaced)
    }
}

text_enum!(TradeDirection {
    Call => "CALL",
    Put => "PUT",
});

text_enum!(ExitReason {
    StopLoss => "STOP_LOSS",
    StopLossHit => "STOP_LOSS_HIT",
    TrailingStop => "TRAILING_STOP",
    ProfitTarget => "PROFIT_TARGET",
    MaxHoldTime => "MAX_HOLD_TIME",
    TimeBased => "TIME_BASED",
    Manual => "MANUAL",
    Signal => "SIGNAL",
});

text_enum!(TradeEventType {
    AlertReceived => "ALERT_RECEIVED",
    ContractSelected => "CONTRACT_SELECTED",
    EntryOrderPlaced => "ENTRY_ORDER_PLACED",
    EntryFilled => "ENTRY_FILLED",
    EntryCancelled => "ENTRY_CANCELLED",
    StopLossPlaced => "STOP_LOSS_PLACED",
    StopLossCancelled => "STOP_LOSS_CANCELLED",
    ExitTriggered => "EXIT_TRIGGERED",
    ExitOrderPlaced => "EXIT_ORDER_PLACED",
    ExitFilled => "EXIT_FILLED",
    StopLossHit => "STOP_LOSS_HIT",
    CloseSignal => "CLOSE_SIGNAL",
    ManualClose => "MANUAL_CLOSE",
});

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub received_at: NaiveDateTime,
    pub raw_payload: String,
    pub ticker: String,
    pub direction: Option<String>,
    pub signal_price: Option<Decimal>,
    /// "external" | "internal_strategy" | "manual_test" | "retake"
    pub source: String,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub trade_id: Option<i64>,
}

impl AlertRow {
    #[must_use]
    pub fn status(&self) -> Option<AlertStatus> {
        AlertStatus::parse(&self.status)
    }

    #[must_use]
    pub fn direction(&self) -> Option<TradeDirection> {
        self.direction.as_deref().and_then(TradeDirection::parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub trade_date: NaiveDate,
    pub ticker: String,
    pub direction: String,
    pub option_symbol: String,
    pub strike_price: Decimal,
    pub expiration_date: NaiveDate,
    pub quantity: i32,
    pub status: String,
    pub source: String,

    pub entry_order_id: Option<String>,
    pub entry_price: Option<Decimal>,
    pub entry_filled_at: Option<NaiveDateTime>,

    pub stop_order_id: Option<String>,
    pub stop_loss_price: Option<Decimal>,
    /// Whether a broker stop order is believed to be resting WORKING.
    pub stop_active: bool,

    pub trailing_stop_price: Option<Decimal>,
    pub highest_price_seen: Option<Decimal>,

    pub exit_order_id: Option<String>,
    pub exit_price: Option<Decimal>,
    pub exit_filled_at: Option<NaiveDateTime>,
    pub exit_reason: Option<String>,

    pub pnl_dollars: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,

    /// ATR at entry for the ATR-based stop; `None` falls back to percent.
    pub entry_atr: Option<Decimal>,

    // Per-trade exit parameter overrides from the originating strategy.
    pub param_stop_loss_percent: Option<Decimal>,
    pub param_profit_target_percent: Option<Decimal>,
    pub param_trailing_stop_percent: Option<Decimal>,
    pub param_max_hold_minutes: Option<i64>,
    pub param_atr_stop_mult: Option<Decimal>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TradeRow {
    #[must_use]
    pub fn status(&self) -> Option<TradeStatus> {
        TradeStatus::parse(&self.status)
    }

    #[must_use]
    pub fn direction(&self) -> Option<TradeDirection> {
        TradeDirection::parse(&self.direction)
    }

    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason.as_deref().and_then(ExitReason::parse)
    }
}

/// Trade insert payload produced by the admission pipeline.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub trade_date: NaiveDate,
    pub ticker: String,
    pub direction: TradeDirection,
    pub option_symbol: String,
    pub strike_price: Decimal,
    pub expiration_date: NaiveDate,
    pub quantity: i32,
    pub entry_order_id: String,
    pub source: String,
    pub entry_atr: Option<Decimal>,
    pub param_stop_loss_percent: Option<Decimal>,
    pub param_profit_target_percent: Option<Decimal>,
    pub param_trailing_stop_percent: Option<Decimal>,
    pub param_max_hold_minutes: Option<i64>,
    pub param_atr_stop_mult: Option<Decimal>,
}

/// Realized PnL for a closed contract position: dollars and percent.
/// Each contract covers 100 shares; percent is price-based.
#[must_use]
pub fn compute_pnl(entry_price: Decimal, exit_price: Decimal, quantity: i32) -> (Decimal, Decimal) {
    let pnl_dollars = (exit_price - entry_price) * Decimal::from(quantity) * Decimal::ONE_HUNDRED;
    let pnl_percent = if entry_price > Decimal::ZERO {
        (exit_price - entry_price) / entry_price * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };
    (pnl_dollars, pnl_percent)
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeEventRow {
    pub id: i64,
    pub trade_id: i64,
    pub timestamp: NaiveDateTime,
    pub event_type: String,
    pub message: String,
    pub details: Option<JsonValue>,
}

impl TradeEventRow {
    #[must_use]
    pub fn event_type(&self) -> Option<TradeEventType> {
        TradeEventType::parse(&self.event_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceSnapshotRow {
    pub id: i64,
    pub trade_id: i64,
    pub timestamp: NaiveDateTime,
    pub price: Decimal,
    pub highest_price_seen: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailySummaryRow {
    pub id: i64,
    pub trade_date: NaiveDate,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub total_pnl: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub win_rate: f64,
    pub avg_hold_time_minutes: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnabledStrategyRow {
    pub ticker: String,
    pub timeframe: String,
    pub signal_type: String,
    pub params: JsonValue,
    pub enabled_at: NaiveDateTime,
}

/// Optimizer favorite read by the control surface. Plain CRUD only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FavoriteRow {
    pub id: i64,
    pub ticker: String,
    pub timeframe: String,
    pub signal_type: String,
    pub params: JsonValue,
    pub label: Option<String>,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            TradeStatus::Pending,
            TradeStatus::Filled,
            TradeStatus::StopLossPlaced,
            TradeStatus::Exiting,
            TradeStatus::Closed,
            TradeStatus::Cancelled,
            TradeStatus::Error,
        ] {
            assert_eq!(TradeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TradeStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(TradeStatus::Closed.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(TradeStatus::Error.is_terminal());
        assert!(!TradeStatus::StopLossPlaced.is_terminal());
    }

    #[test]
    fn open_position_states() {
        assert!(TradeStatus::Filled.is_open_position());
        assert!(TradeStatus::StopLossPlaced.is_open_position());
        assert!(!TradeStatus::Pending.is_open_position());
        assert!(!TradeStatus::Exiting.is_open_position());
    }

    #[test]
    fn exit_reason_spellings() {
        assert_eq!(ExitReason::StopLossHit.as_str(), "STOP_LOSS_HIT");
        assert_eq!(ExitReason::parse("TIME_BASED"), Some(ExitReason::TimeBased));
    }

    #[test]
    fn pnl_per_contract_times_hundred() {
        use rust_decimal_macros::dec;
        let (dollars, percent) = compute_pnl(dec!(0.42), dec!(0.51), 1);
        assert_eq!(dollars, dec!(9.00));
        assert!((percent - dec!(21.43)).abs() < dec!(0.01));

        let (dollars, _) = compute_pnl(dec!(0.42), dec!(0.22), 1);
        assert_eq!(dollars, dec!(-20.00));

        let (dollars, percent) = compute_pnl(dec!(0), dec!(0.10), 2);
        assert_eq!(dollars, dec!(20.00));
        assert_eq!(percent, Decimal::ZERO);
    }
}
