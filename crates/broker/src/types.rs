//! Order and market-data types shared by the broker implementations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side, in the broker's instruction vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instruction {
    BuyToOpen,
    SellToClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Limit { price: Decimal },
    Stop { stop_price: Decimal },
    Market,
}

impl OrderType {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Limit { .. } => "LIMIT",
            Self::Stop { .. } => "STOP",
            Self::Market => "MARKET",
        }
    }
}

/// A fully specified single-leg option order. Duration is always DAY and
/// session NORMAL; both are conveyed on the wire by the HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub option_symbol: String,
    pub instruction: Instruction,
    pub order_type: OrderType,
    pub quantity: i32,
}

impl OrderTicket {
    /// BUY_TO_OPEN limit order for entering a position.
    #[must_use]
    pub fn limit_entry(option_symbol: &str, quantity: i32, price: Decimal) -> Self {
        Self {
            option_symbol: option_symbol.to_string(),
            instruction: Instruction::BuyToOpen,
            order_type: OrderType::Limit { price },
            quantity,
        }
    }

    /// Resting SELL_TO_CLOSE stop order protecting an open position.
    #[must_use]
    pub fn stop_exit(option_symbol: &str, quantity: i32, stop_price: Decimal) -> Self {
        Self {
            option_symbol: option_symbol.to_string(),
            instruction: Instruction::SellToClose,
            order_type: OrderType::Stop { stop_price },
            quantity,
        }
    }

    /// Immediate SELL_TO_CLOSE market order.
    #[must_use]
    pub fn market_exit(option_symbol: &str, quantity: i32) -> Self {
        Self {
            option_symbol: option_symbol.to_string(),
            instruction: Instruction::SellToClose,
            order_type: OrderType::Market,
            quantity,
        }
    }

    /// SELL_TO_CLOSE limit order (used for profit-target exits).
    #[must_use]
    pub fn limit_exit(option_symbol: &str, quantity: i32, price: Decimal) -> Self {
        Self {
            option_symbol: option_symbol.to_string(),
            instruction: Instruction::SellToClose,
            order_type: OrderType::Limit { price },
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Working,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Working)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub order_id: String,
    pub state: OrderState,
    pub filled_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// One strike row from an option chain query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub symbol: String,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub bid: Decimal,
    pub ask: Decimal,
    pub delta: f64,
}

impl ChainEntry {
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Bid-ask spread as a percentage of the mid price.
    #[must_use]
    pub fn spread_percent(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let mid = self.mid();
        if mid <= Decimal::ZERO {
            return f64::INFINITY;
        }
        ((self.ask - self.bid) / mid * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(f64::INFINITY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityQuote {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub change: Decimal,
    pub change_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ticket_builders_set_instruction_and_type() {
        let entry = OrderTicket::limit_entry("SPY 260302C00694000", 2, dec!(0.42));
        assert_eq!(entry.instruction, Instruction::BuyToOpen);
        assert_eq!(entry.order_type.label(), "LIMIT");

        let stop = OrderTicket::stop_exit("SPY 260302C00694000", 2, dec!(0.22));
        assert_eq!(stop.instruction, Instruction::SellToClose);
        assert_eq!(stop.order_type.label(), "STOP");

        let exit = OrderTicket::market_exit("SPY 260302C00694000", 2);
        assert_eq!(exit.instruction, Instruction::SellToClose);
        assert_eq!(exit.order_type.label(), "MARKET");
    }

    #[test]
    fn spread_percent_from_mid() {
        let entry = ChainEntry {
            symbol: "SPY 260302C00694000".to_string(),
            strike: dec!(694),
            expiry: chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            bid: dec!(0.41),
            ask: dec!(0.42),
            delta: 0.48,
        };
        let pct = entry.spread_percent();
        assert!((pct - 2.409).abs() < 0.01, "got {pct}");
    }

    #[test]
    fn zero_mid_spread_is_infinite() {
        let entry = ChainEntry {
            symbol: "X".to_string(),
            strike: dec!(100),
            expiry: chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            bid: dec!(0),
            ask: dec!(0),
            delta: 0.5,
        };
        assert!(entry.spread_percent().is_infinite());
    }
}
