//! Exit-condition evaluation for open positions.
//!
//! [`decide_exit`] is the pure priority ladder over a position snapshot;
//! [`ExitEngine`] wires it to the quote cache, broker, and trade store.
//! Five conditions are checked in strict order: force-exit time, max hold,
//! app-managed stop, profit target, trailing stop. The first trigger wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use daytrader_broker::{with_backoff, BrokerClient, OptionRight, OrderTicket};
use daytrader_core::{ExitConfig, MonitorConfig, SessionConfig, SharedOverrides};
use daytrader_data::models::TradeEventType;
use daytrader_data::{ExitReason, TradeDirection, TradeRow, TradeStatus, TradeStore};
use daytrader_market_data::QuoteCache;

use crate::locks::TradeLocks;

/// Snapshot of the trade fields the exit ladder consults.
#[derive(Debug, Clone)]
pub struct PositionView {
    pub entry_price: Decimal,
    pub entry_filled_at: Option<NaiveDateTime>,
    pub stop_loss_price: Option<Decimal>,
    pub trailing_stop_price: Option<Decimal>,
    /// Whether a broker stop order is believed to be resting WORKING.
    pub stop_active: bool,
}

impl PositionView {
    #[must_use]
    pub fn from_trade(trade: &TradeRow) -> Option<Self> {
        Some(Self {
            entry_price: trade.entry_price?,
            entry_filled_at: trade.entry_filled_at,
            stop_loss_price: trade.stop_loss_price,
            trailing_stop_price: trade.trailing_stop_price,
            stop_active: trade.stop_active,
        })
    }
}

/// Per-trade exit parameters after strategy overrides are applied.
#[derive(Debug, Clone)]
pub struct ExitParams {
    pub force_exit: NaiveTime,
    pub max_hold_minutes: i64,
    pub profit_target_percent: Decimal,
    pub trailing_stop_percent: Decimal,
}

impl ExitParams {
    fn resolve(trade: &TradeRow, exits: &ExitConfig, session: &SessionConfig) -> Self {
        Self {
            force_exit: session.force_exit_time(),
            max_hold_minutes: trade
                .param_max_hold_minutes
                .unwrap_or(exits.max_hold_minutes),
            profit_target_percent: trade
                .param_profit_target_percent
                .unwrap_or(exits.profit_target_percent),
            trailing_stop_percent: trade
                .param_trailing_stop_percent
                .unwrap_or(exits.trailing_stop_percent),
        }
    }
}

/// Advances the high-water mark. Returns the new mark and the trailing
/// stop derived from it when the mark moved; trailing never decreases
/// because the mark never does.
#[must_use]
pub fn advance_high_water(
    prior_high: Decimal,
    current_price: Decimal,
    trailing_percent: Decimal,
) -> Option<(Decimal, Decimal)> {
    if current_price <= prior_high {
        return None;
    }
    let trailing =
        current_price * (Decimal::ONE - trailing_percent / Decimal::ONE_HUNDRED);
    Some((current_price, trailing.round_dp(4)))
}

/// The exit priority ladder. First trigger wins.
#[must_use]
pub fn decide_exit(
    view: &PositionView,
    current_price: Decimal,
    now_et: DateTime<Tz>,
    params: &ExitParams,
) -> Option<(ExitReason, String)> {
    // 1. Hard end-of-session flat.
    if now_et.time() >= params.force_exit {
        return Some((
            ExitReason::TimeBased,
            format!("Force exit at {} ET", now_et.format("%H:%M")),
        ));
    }

    // 2. Maximum hold time.
    if let Some(filled_at) = view.entry_filled_at {
        let filled_utc = daytrader_core::from_naive_utc(filled_at);
        let elapsed_minutes = (now_et.with_timezone(&Utc) - filled_utc).num_minutes();
        if elapsed_minutes >= params.max_hold_minutes {
            return Some((
                ExitReason::MaxHoldTime,
                format!(
                    "Max hold reached ({elapsed_minutes} min >= {} min)",
                    params.max_hold_minutes
                ),
            ));
        }
    }

    // 3. App-managed stop, only while no broker stop is believed working.
    if !view.stop_active {
        if let Some(stop) = view.stop_loss_price {
            if current_price <= stop {
                return Some((
                    ExitReason::StopLoss,
                    format!("App-managed stop hit ({current_price:.2} <= {stop:.2})"),
                ));
            }
        }
    }

    // 4. Profit target.
    let target = view.entry_price
        * (Decimal::ONE + params.profit_target_percent / Decimal::ONE_HUNDRED);
    if current_price >= target {
        return Some((
            ExitReason::ProfitTarget,
            format!(
                "Profit target reached ({current_price:.2} >= {target:.2}, +{}%)",
                params.profit_target_percent
            ),
        ));
    }

    // 5. Trailing stop.
    if let Some(trail) = view.trailing_stop_price {
        if current_price <= trail {
            return Some((
                ExitReason::TrailingStop,
                format!("Trailing stop hit ({current_price:.2} <= {trail:.2})"),
            ));
        }
    }

    None
}

pub struct ExitEngine {
    broker: Arc<dyn BrokerClient>,
    store: TradeStore,
    cache: Arc<QuoteCache>,
    locks: Arc<TradeLocks>,
    overrides: SharedOverrides,
    exits: ExitConfig,
    session: SessionConfig,
    monitors: MonitorConfig,
    cursor: AtomicUsize,
}

impl ExitEngine {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: TradeStore,
        cache: Arc<QuoteCache>,
        locks: Arc<TradeLocks>,
        overrides: SharedOverrides,
        exits: ExitConfig,
        session: SessionConfig,
        monitors: MonitorConfig,
    ) -> Self {
        Self {
            broker,
            store,
            cache,
            locks,
            overrides,
            exits,
            session,
            monitors,
            cursor: AtomicUsize::new(0),
        }
    }

    /// One evaluation pass over trades protected by a placed stop.
    pub async fn tick(&self) -> Result<()> {
        let now_et = daytrader_core::now_eastern();
        let today = daytrader_core::session_date(now_et);
        let trades: Vec<TradeRow> = self
            .store
            .open_position_trades(today)
            .await?
            .into_iter()
            .filter(|t| t.status() == Some(TradeStatus::StopLossPlaced))
            .collect();
        if trades.is_empty() {
            return Ok(());
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % trades.len();
        let batch: Vec<TradeRow> = trades
            .iter()
            .cycle()
            .skip(start)
            .take(trades.len().min(self.monitors.max_trades_per_tick))
            .cloned()
            .collect();

        for trade in batch {
            let trade_id = trade.id;
            if let Err(err) = self.evaluate_trade(trade, now_et).await {
                tracing::warn!(trade_id, %err, "Exit evaluation failed for trade");
            }
        }
        Ok(())
    }

    /// Current option price: streaming cache first, chain mid fallback.
    async fn current_price(&self, trade: &TradeRow) -> Option<Decimal> {
        if let Some(snap) = self.cache.get(&trade.option_symbol) {
            let mid = snap.mid();
            if mid > Decimal::ZERO {
                return Some(mid);
            }
        }

        let right = match trade.direction() {
            Some(TradeDirection::Call) => OptionRight::Call,
            Some(TradeDirection::Put) => OptionRight::Put,
            None => return None,
        };
        let chain = self
            .broker
            .option_chain(&trade.ticker, right, 20, trade.expiration_date)
            .await
            .ok()?;
        chain
            .iter()
            .find(|entry| entry.symbol == trade.option_symbol)
            .map(daytrader_broker::ChainEntry::mid)
            .filter(|mid| *mid > Decimal::ZERO)
    }

    async fn evaluate_trade(&self, trade: TradeRow, now_et: DateTime<Tz>) -> Result<()> {
        let Some(current_price) = self.current_price(&trade).await else {
            tracing::warn!(trade_id = trade.id, symbol = trade.option_symbol, "No current price");
            return Ok(());
        };

        let _guard = self.locks.lock(trade.id).await;
        let Some(trade) = self.store.get_trade(trade.id).await? else {
            return Ok(());
        };
        if trade.status() != Some(TradeStatus::StopLossPlaced) {
            return Ok(());
        }
        let Some(mut view) = PositionView::from_trade(&trade) else {
            return Ok(());
        };
        let params = ExitParams::resolve(&trade, &self.exits, &self.session);

        // Ratchet the high-water mark and trailing stop.
        let prior_high = trade.highest_price_seen.unwrap_or(view.entry_price);
        if let Some((new_high, new_trailing)) =
            advance_high_water(prior_high, current_price, params.trailing_stop_percent)
        {
            self.store
                .update_trailing(trade.id, new_high, Some(new_trailing))
                .await?;
            view.trailing_stop_price = Some(new_trailing);
        }

        // Persist a chart-reconstruction snapshot, rate limited.
        let high_for_snapshot = prior_high.max(current_price);
        self.store
            .insert_price_snapshot(
                trade.id,
                current_price,
                high_for_snapshot,
                self.monitors.snapshot_interval_secs,
            )
            .await?;

        let Some((reason, detail)) = decide_exit(&view, current_price, now_et, &params) else {
            return Ok(());
        };
        tracing::info!(trade_id = trade.id, reason = reason.as_str(), detail, "Exit triggered");
        self.execute_exit(&trade, reason, &detail, current_price).await
    }

    /// Cancels the resting stop (best effort) and places the closing order.
    async fn execute_exit(
        &self,
        trade: &TradeRow,
        reason: ExitReason,
        detail: &str,
        current_price: Decimal,
    ) -> Result<()> {
        if trade.stop_active {
            if let Some(stop_order_id) = &trade.stop_order_id {
                match self.broker.cancel_order(stop_order_id).await {
                    Ok(()) => {
                        self.store
                            .log_event(
                                trade.id,
                                TradeEventType::StopLossCancelled,
                                &format!("Stop order {stop_order_id} cancelled for exit"),
                                None,
                            )
                            .await?;
                    }
                    Err(err) => {
                        tracing::warn!(trade_id = trade.id, %err, "Could not cancel stop order");
                    }
                }
            }
        }

        // Favorable exits go out as limit at the current price; protective
        // exits always cross as market. The operator override forces all
        // exits to market.
        let use_limit = !self.overrides.read().use_market_exits
            && matches!(reason, ExitReason::ProfitTarget | ExitReason::TrailingStop);
        let ticket = if use_limit {
            OrderTicket::limit_exit(&trade.option_symbol, trade.quantity, current_price)
        } else {
            OrderTicket::market_exit(&trade.option_symbol, trade.quantity)
        };

        let order_id = match with_backoff(4, || self.broker.place_order(&ticket)).await {
            Ok(order_id) => order_id,
            Err(err) if err.is_transient() => {
                tracing::warn!(trade_id = trade.id, %err, "Exit order deferred to next tick");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let order_message = format!(
            "{} sell {}x placed, reason={}, order={order_id}",
            ticket.order_type.label(),
            trade.quantity,
            reason.as_str()
        );
        self.store
            .record_exit_trigger(trade.id, reason, &order_id, detail, &order_message)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use rust_decimal_macros::dec;

    fn et(h: u32, m: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2026, 3, 2, h, m, 0).single().unwrap()
    }

    fn entry_at(h: u32, m: u32) -> NaiveDateTime {
        et(h, m).with_timezone(&Utc).naive_utc()
    }

    fn params() -> ExitParams {
        ExitParams {
            force_exit: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            max_hold_minutes: 90,
            profit_target_percent: dec!(40),
            trailing_stop_percent: dec!(20),
        }
    }

    fn view() -> PositionView {
        PositionView {
            entry_price: dec!(0.42),
            entry_filled_at: Some(entry_at(10, 0)),
            stop_loss_price: Some(dec!(0.22)),
            trailing_stop_price: None,
            stop_active: true,
        }
    }

    #[test]
    fn trailing_stop_fires_after_runup() {
        // Price ran to 0.60: trailing stop ratchets to 0.48, then price
        // falls to 0.51 with a 0.51 trail from the 0.60 high water.
        let (high, trail) = advance_high_water(dec!(0.42), dec!(0.60), dec!(15)).unwrap();
        assert_eq!(high, dec!(0.60));
        assert_eq!(trail, dec!(0.51));

        let mut v = view();
        v.trailing_stop_price = Some(trail);
        let (reason, _) = decide_exit(&v, dec!(0.51), et(11, 0), &params()).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
    }

    #[test]
    fn high_water_is_monotonic() {
        assert!(advance_high_water(dec!(0.60), dec!(0.55), dec!(20)).is_none());
        assert!(advance_high_water(dec!(0.60), dec!(0.60), dec!(20)).is_none());
        let (high, trail) = advance_high_water(dec!(0.60), dec!(0.65), dec!(20)).unwrap();
        assert_eq!(high, dec!(0.65));
        assert_eq!(trail, dec!(0.52));
    }

    #[test]
    fn force_exit_beats_everything() {
        // Entered at 14:58; at 15:00 the time-based exit fires even though
        // max hold is far away and the price would also hit the target.
        let mut v = view();
        v.entry_filled_at = Some(entry_at(14, 58));
        let (reason, _) = decide_exit(&v, dec!(0.80), et(15, 0), &params()).unwrap();
        assert_eq!(reason, ExitReason::TimeBased);
    }

    #[test]
    fn max_hold_beats_price_exits() {
        let mut p = params();
        p.max_hold_minutes = 30;
        // 40 minutes in, price at the profit target: hold-time wins.
        let (reason, _) = decide_exit(&view(), dec!(0.80), et(10, 40), &p).unwrap();
        assert_eq!(reason, ExitReason::MaxHoldTime);
    }

    #[test]
    fn app_stop_only_when_broker_stop_inactive() {
        let mut v = view();
        v.stop_active = true;
        // Broker stop believed working: the engine leaves the stop to it.
        assert!(decide_exit(&v, dec!(0.20), et(10, 30), &params()).is_none());

        v.stop_active = false;
        let (reason, _) = decide_exit(&v, dec!(0.20), et(10, 30), &params()).unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
    }

    #[test]
    fn profit_target_fires_at_threshold() {
        // 0.42 * 1.40 = 0.588.
        let (reason, _) = decide_exit(&view(), dec!(0.588), et(10, 30), &params()).unwrap();
        assert_eq!(reason, ExitReason::ProfitTarget);
        assert!(decide_exit(&view(), dec!(0.58), et(10, 30), &params()).is_none());
    }

    #[test]
    fn app_stop_beats_profit_target_in_same_tick() {
        // Degenerate configuration where both conditions hold: priority
        // order resolves to the stop.
        let mut v = view();
        v.stop_active = false;
        v.stop_loss_price = Some(dec!(1.00));
        let mut p = params();
        p.profit_target_percent = dec!(10);
        let (reason, _) = decide_exit(&v, dec!(0.80), et(10, 30), &p).unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
    }

    #[test]
    fn quiet_position_holds() {
        assert!(decide_exit(&view(), dec!(0.45), et(10, 30), &params()).is_none());
    }
}
