//! End-to-end lifecycle scenarios against the paper broker.
//!
//! These drive the admission-side components (selection, stop computation,
//! sizing) and the exit ladder through full trade stories, checking the
//! resulting prices and reasons at every step.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use rust_decimal_macros::dec;

use daytrader_broker::{
    BrokerClient, ChainEntry, OptionRight, OrderState, OrderTicket, PaperBroker,
};
use daytrader_core::SelectorConfig;
use daytrader_data::{compute_pnl, ExitReason};
use daytrader_engine::{
    advance_high_water, compute_stop_price, decide_exit, ContractSelector, ExitParams,
    PositionView,
};

fn session_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn et(h: u32, m: u32) -> chrono::DateTime<chrono_tz::Tz> {
    New_York.with_ymd_and_hms(2026, 3, 2, h, m, 0).single().unwrap()
}

fn chain_entry(symbol: &str, strike: rust_decimal::Decimal, bid: rust_decimal::Decimal, ask: rust_decimal::Decimal, delta: f64) -> ChainEntry {
    ChainEntry {
        symbol: symbol.to_string(),
        strike,
        expiry: session_day(),
        bid,
        ask,
        delta,
    }
}

fn exit_params(trailing_pct: rust_decimal::Decimal) -> ExitParams {
    ExitParams {
        force_exit: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        max_hold_minutes: 180,
        profit_target_percent: dec!(40),
        trailing_stop_percent: trailing_pct,
    }
}

/// Alert at 10:00, 694 call fills at the 0.42 ask, ATR stop at 0.22, price
/// runs to 0.60 and falls back to the 0.51 trail: the trade exits as
/// TRAILING_STOP for +$9.00.
#[tokio::test]
async fn happy_path_ends_in_trailing_stop() {
    let broker = std::sync::Arc::new(PaperBroker::new());
    broker.set_chain(
        "SPY",
        OptionRight::Call,
        vec![
            chain_entry("SPY 260302C00692000", dec!(692), dec!(0.80), dec!(0.84), 0.63),
            chain_entry("SPY 260302C00694000", dec!(694), dec!(0.41), dec!(0.42), 0.48),
            chain_entry("SPY 260302C00696000", dec!(696), dec!(0.17), dec!(0.18), 0.28),
        ],
    );

    // Selection picks the 694 strike (closest delta, tight spread).
    let selector = ContractSelector::new(broker.clone(), SelectorConfig::default());
    let best = selector
        .select("SPY", OptionRight::Call, dec!(694.50), session_day())
        .await
        .unwrap();
    assert_eq!(best.symbol, "SPY 260302C00694000");
    assert_eq!(best.strike, dec!(694));

    // Entry limit at the ask fills deterministically.
    let entry_id = broker
        .place_order(&OrderTicket::limit_entry(&best.symbol, 1, best.ask))
        .await
        .unwrap();
    let entry = broker.order_status(&entry_id).await.unwrap();
    assert_eq!(entry.state, OrderState::Filled);
    let entry_price = entry.filled_price.unwrap();
    assert_eq!(entry_price, dec!(0.42));

    // ATR-based stop: 0.42 - 2 * 0.10 = 0.22, rests WORKING at the broker.
    let stop_price = compute_stop_price(entry_price, Some(dec!(0.10)), dec!(2), dec!(60));
    assert_eq!(stop_price, dec!(0.22));
    let stop_id = broker
        .place_order(&OrderTicket::stop_exit(&best.symbol, 1, stop_price))
        .await
        .unwrap();
    assert_eq!(broker.order_state(&stop_id), Some(OrderState::Working));

    // Price runs to 0.60: the trail ratchets to 0.51 (15%).
    let (high, trail) = advance_high_water(entry_price, dec!(0.60), dec!(15)).unwrap();
    assert_eq!(high, dec!(0.60));
    assert_eq!(trail, dec!(0.51));

    let view = PositionView {
        entry_price,
        entry_filled_at: Some(et(10, 0).with_timezone(&Utc).naive_utc()),
        stop_loss_price: Some(stop_price),
        trailing_stop_price: Some(trail),
        stop_active: true,
    };

    // At 0.55 nothing fires; at 0.51 the trailing stop does.
    assert!(decide_exit(&view, dec!(0.55), et(11, 0), &exit_params(dec!(15))).is_none());
    let (reason, _) = decide_exit(&view, dec!(0.51), et(11, 0), &exit_params(dec!(15))).unwrap();
    assert_eq!(reason, ExitReason::TrailingStop);

    // Stop is cancelled and the market exit fills at the trigger price.
    broker.cancel_order(&stop_id).await.unwrap();
    broker.set_mark(&best.symbol, dec!(0.51));
    let exit_id = broker
        .place_order(&OrderTicket::market_exit(&best.symbol, 1))
        .await
        .unwrap();
    let exit = broker.order_status(&exit_id).await.unwrap();
    let exit_price = exit.filled_price.unwrap();

    let (pnl_dollars, pnl_percent) = compute_pnl(entry_price, exit_price, 1);
    assert_eq!(pnl_dollars, dec!(9.00));
    assert!(pnl_percent > dec!(21) && pnl_percent < dec!(22));
}

/// Entry at 14:58 with max hold 180 minutes: the 15:00 force-exit fires
/// first anyway.
#[test]
fn force_exit_preempts_max_hold() {
    let view = PositionView {
        entry_price: dec!(0.42),
        entry_filled_at: Some(et(14, 58).with_timezone(&Utc).naive_utc()),
        stop_loss_price: Some(dec!(0.22)),
        trailing_stop_price: None,
        stop_active: true,
    };
    let (reason, _) = decide_exit(&view, dec!(0.45), et(15, 0), &exit_params(dec!(20))).unwrap();
    assert_eq!(reason, ExitReason::TimeBased);
}

/// The broker stop trips at 0.22: booked PnL is -$20.00 per the stop-hit
/// story in scenario form.
#[tokio::test]
async fn broker_stop_hit_books_full_loss() {
    let broker = PaperBroker::new();
    let stop_id = broker
        .place_order(&OrderTicket::stop_exit("SPY 260302C00694000", 1, dec!(0.22)))
        .await
        .unwrap();
    assert_eq!(broker.order_state(&stop_id), Some(OrderState::Working));

    broker.trip_stop(&stop_id, dec!(0.22));
    let report = broker.order_status(&stop_id).await.unwrap();
    assert_eq!(report.state, OrderState::Filled);

    let (pnl_dollars, _) = compute_pnl(dec!(0.42), report.filled_price.unwrap(), 1);
    assert_eq!(pnl_dollars, dec!(-20.00));
}

/// A working entry order past its timeout is cancelled at the broker and
/// never replaced: the only orders ever placed are the entry and its
/// cancellation.
#[tokio::test]
async fn limit_timeout_cancels_without_chasing() {
    let broker = PaperBroker::new();
    // Stop-type order stands in for a resting unfilled entry.
    let order_id = broker
        .place_order(&OrderTicket::stop_exit("SPY 260302C00694000", 1, dec!(0.40)))
        .await
        .unwrap();
    assert_eq!(broker.order_state(&order_id), Some(OrderState::Working));

    broker.cancel_order(&order_id).await.unwrap();
    assert_eq!(broker.order_state(&order_id), Some(OrderState::Cancelled));

    // Cancelling again is a protocol rejection, not a retryable failure.
    let err = broker.cancel_order(&order_id).await.unwrap_err();
    assert!(!err.is_transient());
}

/// Exit priority under conflict: when both the hold timer and the profit
/// target are breached in the same tick, the higher-priority hold timer
/// records the reason.
#[test]
fn max_hold_outranks_profit_target() {
    let mut params = exit_params(dec!(20));
    params.max_hold_minutes = 30;
    let view = PositionView {
        entry_price: dec!(0.42),
        entry_filled_at: Some(et(10, 0).with_timezone(&Utc).naive_utc()),
        stop_loss_price: Some(dec!(0.22)),
        trailing_stop_price: None,
        stop_active: true,
    };
    let (reason, _) = decide_exit(&view, dec!(0.80), et(10, 45), &params).unwrap();
    assert_eq!(reason, ExitReason::MaxHoldTime);
}

/// Trailing stop never loosens: a lower price cannot move the mark, so the
/// trail computed from it stands.
#[test]
fn trailing_stop_is_monotonic_across_updates() {
    let mut high = dec!(0.42);
    let mut trail = None;
    for price in [dec!(0.50), dec!(0.48), dec!(0.60), dec!(0.55), dec!(0.65)] {
        if let Some((new_high, new_trail)) = advance_high_water(high, price, dec!(20)) {
            assert!(new_high > high);
            if let Some(prior) = trail {
                assert!(new_trail > prior, "trail weakened: {new_trail} <= {prior}");
            }
            high = new_high;
            trail = Some(new_trail);
        }
    }
    assert_eq!(high, dec!(0.65));
    assert_eq!(trail, Some(dec!(0.52)));
}
