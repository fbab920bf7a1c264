//! Pre-trade risk gate.
//!
//! Ordered predicates; the first failure rejects the alert with a stable
//! machine-readable reason code, so re-submitting the same alert under the
//! same conditions yields the same rejection.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use daytrader_broker::BrokerClient;
use daytrader_core::{RiskConfig, SessionConfig, SharedOverrides};
use daytrader_data::{TradeDirection, TradeStore};
use daytrader_market_data::QuoteCache;

use crate::calendar::EventCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSecret,
    TickerNotAllowed,
    OutsideTradingWindow,
    VixCircuitBreaker,
    EventAfternoonBlocked,
    DailyTradeLimit,
    ConsecutiveLosses,
    DailyLossLimit,
    TradeCooldown,
    DuplicateTicker,
    SignalDebounce,
    DuplicateAlert,
    NoOpenPosition,
}

impl RejectReason {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidSecret => "invalid_secret",
            Self::TickerNotAllowed => "ticker_not_allowed",
            Self::OutsideTradingWindow => "outside_trading_window",
            Self::VixCircuitBreaker => "vix_circuit_breaker",
            Self::EventAfternoonBlocked => "event_afternoon_blocked",
            Self::DailyTradeLimit => "daily_trade_limit",
            Self::ConsecutiveLosses => "consecutive_losses",
            Self::DailyLossLimit => "daily_loss_limit",
            Self::TradeCooldown => "trade_cooldown",
            Self::DuplicateTicker => "duplicate_ticker",
            Self::SignalDebounce => "signal_debounce",
            Self::DuplicateAlert => "duplicate_alert",
            Self::NoOpenPosition => "no_open_position",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug)]
pub enum GateOutcome {
    Pass,
    Reject { reason: RejectReason, message: String },
}

impl GateOutcome {
    fn reject(reason: RejectReason, message: impl Into<String>) -> Self {
        Self::Reject {
            reason,
            message: message.into(),
        }
    }
}

/// What the gate needs to know about the incoming alert.
#[derive(Debug, Clone)]
pub struct GateInput {
    pub alert_id: i64,
    pub ticker: String,
    pub direction: Option<TradeDirection>,
    pub is_close: bool,
    /// Secret from the webhook payload; internal sources carry none.
    pub provided_secret: Option<String>,
    /// True only for alerts arriving over the external webhook.
    pub external: bool,
}

pub struct RiskGate {
    store: TradeStore,
    cache: Arc<QuoteCache>,
    broker: Arc<dyn BrokerClient>,
    calendar: EventCalendar,
    overrides: SharedOverrides,
    risk: RiskConfig,
    session: SessionConfig,
    webhook_secret: String,
}

impl RiskGate {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: TradeStore,
        cache: Arc<QuoteCache>,
        broker: Arc<dyn BrokerClient>,
        calendar: EventCalendar,
        overrides: SharedOverrides,
        risk: RiskConfig,
        session: SessionConfig,
        webhook_secret: String,
    ) -> Self {
        Self {
            store,
            cache,
            broker,
            calendar,
            overrides,
            risk,
            session,
            webhook_secret,
        }
    }

    /// Runs the ordered predicates. Database failures abort; market-data
    /// failures on the VIX check fail open.
    pub async fn evaluate(&self, input: &GateInput, now_et: DateTime<Tz>) -> Result<GateOutcome> {
        // 1. Webhook secret (external alerts only).
        if input.external && input.provided_secret.as_deref() != Some(self.webhook_secret.as_str())
        {
            return Ok(GateOutcome::reject(
                RejectReason::InvalidSecret,
                "Invalid webhook secret",
            ));
        }

        // 2. Ticker allowlist.
        let ticker = input.ticker.to_uppercase();
        if !self.risk.allowed_tickers.iter().any(|t| t == &ticker) {
            return Ok(GateOutcome::reject(
                RejectReason::TickerNotAllowed,
                format!("Unsupported ticker: {ticker}"),
            ));
        }

        // CLOSE is risk-reducing: it skips the entry gates and only needs
        // an open position to act on.
        if input.is_close {
            return self.check_close().await;
        }

        // 3. Session window, unless the operator override is set.
        if !self.overrides.read().ignore_session_windows
            && !self.session.in_entry_window(now_et)
        {
            return Ok(GateOutcome::reject(
                RejectReason::OutsideTradingWindow,
                format!(
                    "Outside entry window ({} ET; window {}-{})",
                    now_et.format("%H:%M"),
                    self.session.first_entry,
                    self.session.last_entry
                ),
            ));
        }

        // 4. VIX circuit breaker. Streaming cache first, REST fallback;
        //    unreadable VIX permits the trade.
        if self.risk.vix_circuit_breaker > Decimal::ZERO {
            if let Some(vix) = self.read_vix().await {
                if vix >= self.risk.vix_circuit_breaker {
                    return Ok(GateOutcome::reject(
                        RejectReason::VixCircuitBreaker,
                        format!(
                            "VIX {vix:.1} >= circuit breaker {}",
                            self.risk.vix_circuit_breaker
                        ),
                    ));
                }
            }
        }

        // 5. Event-day afternoon block.
        let session_date = now_et.date_naive();
        if now_et.time() >= self.session.afternoon_cutoff_time()
            && self.calendar.is_blocked_afternoon(session_date)
        {
            return Ok(GateOutcome::reject(
                RejectReason::EventAfternoonBlocked,
                format!("Afternoon blocked: event day {session_date}"),
            ));
        }

        // 6. Daily trade cap.
        let trade_count = self.store.count_non_cancelled(session_date).await?;
        if trade_count >= i64::from(self.risk.max_daily_trades) {
            return Ok(GateOutcome::reject(
                RejectReason::DailyTradeLimit,
                format!(
                    "Daily trade limit reached ({trade_count}/{})",
                    self.risk.max_daily_trades
                ),
            ));
        }

        // 7. Consecutive-loss cap.
        let losses = self.store.consecutive_signal_losses(session_date).await?;
        if losses >= self.risk.max_consecutive_losses {
            return Ok(GateOutcome::reject(
                RejectReason::ConsecutiveLosses,
                format!("Trading paused: {losses} consecutive losses"),
            ));
        }

        // 8. Daily loss cap.
        let daily_pnl = self.store.daily_closed_pnl(session_date).await?;
        if daily_pnl <= -self.risk.max_daily_loss {
            return Ok(GateOutcome::reject(
                RejectReason::DailyLossLimit,
                format!("Daily loss limit reached (${daily_pnl:.2})"),
            ));
        }

        // 8a. Per-ticker cooldown.
        let now_utc = now_et.with_timezone(&Utc).naive_utc();
        let cooldown_cutoff = now_utc - Duration::minutes(self.risk.trade_cooldown_minutes);
        if let Some(recent) = self
            .store
            .recent_trade_for_ticker(session_date, &ticker, cooldown_cutoff)
            .await?
        {
            return Ok(GateOutcome::reject(
                RejectReason::TradeCooldown,
                format!(
                    "Cooldown active for {ticker} (trade #{} within {} min)",
                    recent.id, self.risk.trade_cooldown_minutes
                ),
            ));
        }

        // 8b. One open position per ticker.
        if let Some(open) = self
            .store
            .active_trade_for_ticker(session_date, &ticker)
            .await?
        {
            // Opposite direction is handled upstream as a reverse signal;
            // the same direction is a duplicate.
            if input.direction.map(TradeDirection::as_str) == Some(open.direction.as_str()) {
                return Ok(GateOutcome::reject(
                    RejectReason::DuplicateTicker,
                    format!(
                        "{ticker} already has an open {} position (trade #{})",
                        open.direction, open.id
                    ),
                ));
            }
        }

        // 8c. Opposite-signal debounce.
        if let Some(direction) = input.direction {
            let debounce_cutoff = now_utc - Duration::minutes(self.risk.signal_debounce_minutes);
            if let Some(opposite) = self
                .store
                .recent_opposite_alert(direction, debounce_cutoff)
                .await?
            {
                if opposite.id != input.alert_id {
                    return Ok(GateOutcome::reject(
                        RejectReason::SignalDebounce,
                        format!(
                            "Opposite-direction alert #{} within {} min",
                            opposite.id, self.risk.signal_debounce_minutes
                        ),
                    ));
                }
            }
        }

        // 8d. Identical-alert dedup (external sources re-deliver).
        if let Some(direction) = input.direction {
            let dedup_cutoff = now_utc - Duration::seconds(self.risk.dedup_window_seconds);
            if let Some(dup) = self
                .store
                .duplicate_alert(input.alert_id, direction, dedup_cutoff)
                .await?
            {
                return Ok(GateOutcome::reject(
                    RejectReason::DuplicateAlert,
                    format!(
                        "Duplicate of alert #{} within {}s",
                        dup.id, self.risk.dedup_window_seconds
                    ),
                ));
            }
        }

        Ok(GateOutcome::Pass)
    }

    async fn check_close(&self) -> Result<GateOutcome> {
        let today = daytrader_core::session_date(daytrader_core::now_eastern());
        let open = self.store.open_position_trades(today).await?;
        if open.is_empty() {
            Ok(GateOutcome::reject(
                RejectReason::NoOpenPosition,
                "No open positions to close",
            ))
        } else {
            Ok(GateOutcome::Pass)
        }
    }

    async fn read_vix(&self) -> Option<Decimal> {
        if let Some(snap) = self.cache.get(&self.risk.vix_symbol) {
            if snap.last > Decimal::ZERO {
                return Some(snap.last);
            }
        }
        match self.broker.equity_quote(&self.risk.vix_symbol).await {
            Ok(quote) if quote.last > Decimal::ZERO => Some(quote.last),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(%err, "VIX read failed, permitting trade");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(RejectReason::DailyTradeLimit.code(), "daily_trade_limit");
        assert_eq!(RejectReason::VixCircuitBreaker.code(), "vix_circuit_breaker");
        assert_eq!(RejectReason::InvalidSecret.code(), "invalid_secret");
        assert_eq!(RejectReason::NoOpenPosition.code(), "no_open_position");
    }
}
