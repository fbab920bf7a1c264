//! 0-DTE contract selection.
//!
//! Fetches today's chain around at-the-money, drops dead or wide-spread
//! rows, and picks the contract minimizing delta distance plus spread
//! penalty. Ties break on tighter spread, then strike nearest the
//! underlying.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use daytrader_broker::{BrokerClient, ChainEntry, OptionRight};
use daytrader_core::{EngineError, Result, SelectorConfig};

#[derive(Debug, Clone)]
pub struct SelectedContract {
    pub symbol: String,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub delta: f64,
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread_percent: f64,
}

pub struct ContractSelector {
    broker: Arc<dyn BrokerClient>,
    config: SelectorConfig,
}

impl ContractSelector {
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>, config: SelectorConfig) -> Self {
        Self { broker, config }
    }

    /// Picks the best contract for today's expiration.
    ///
    /// # Errors
    /// `EngineError::NoLiquidContract` when no chain row survives the
    /// liveness filters; broker errors pass through.
    pub async fn select(
        &self,
        ticker: &str,
        right: OptionRight,
        underlying_price: Decimal,
        expiry: NaiveDate,
    ) -> Result<SelectedContract> {
        let chain = self
            .broker
            .option_chain(ticker, right, self.config.strike_count, expiry)
            .await?;

        let best = rank_chain(
            &chain,
            self.config.delta_target,
            self.config.max_spread_percent,
            underlying_price,
        )
        .ok_or_else(|| EngineError::NoLiquidContract(ticker.to_string()))?;

        let selected = SelectedContract {
            symbol: best.symbol.clone(),
            strike: best.strike,
            expiry: best.expiry,
            delta: best.delta,
            bid: best.bid,
            ask: best.ask,
            spread_percent: best.spread_percent(),
        };
        tracing::info!(
            symbol = selected.symbol,
            strike = %selected.strike,
            delta = selected.delta,
            spread_pct = format!("{:.1}", selected.spread_percent),
            "Contract selected"
        );
        Ok(selected)
    }
}

/// Scores surviving chain rows; lower is better.
fn score(entry: &ChainEntry, delta_target: f64) -> f64 {
    (entry.delta.abs() - delta_target).abs() + entry.spread_percent() / 100.0
}

/// Applies the liveness filters and returns the best-scoring entry.
fn rank_chain<'a>(
    chain: &'a [ChainEntry],
    delta_target: f64,
    max_spread_percent: f64,
    underlying_price: Decimal,
) -> Option<&'a ChainEntry> {
    let underlying = underlying_price.to_f64().unwrap_or(0.0);
    chain
        .iter()
        .filter(|e| e.bid > Decimal::ZERO && e.ask > Decimal::ZERO)
        .filter(|e| e.spread_percent() <= max_spread_percent)
        .min_by(|a, b| {
            score(a, delta_target)
                .total_cmp(&score(b, delta_target))
                .then_with(|| a.spread_percent().total_cmp(&b.spread_percent()))
                .then_with(|| {
                    let da = (a.strike.to_f64().unwrap_or(0.0) - underlying).abs();
                    let db = (b.strike.to_f64().unwrap_or(0.0) - underlying).abs();
                    da.total_cmp(&db)
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(symbol: &str, strike: Decimal, bid: Decimal, ask: Decimal, delta: f64) -> ChainEntry {
        ChainEntry {
            symbol: symbol.to_string(),
            strike,
            expiry: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            bid,
            ask,
            delta,
        }
    }

    #[test]
    fn picks_closest_delta() {
        let chain = vec![
            entry("C692", dec!(692), dec!(0.80), dec!(0.82), 0.62),
            entry("C694", dec!(694), dec!(0.41), dec!(0.42), 0.48),
            entry("C696", dec!(696), dec!(0.18), dec!(0.19), 0.27),
        ];
        let best = rank_chain(&chain, 0.40, 10.0, dec!(694.50)).unwrap();
        assert_eq!(best.symbol, "C694");
    }

    #[test]
    fn rejects_dead_quotes() {
        let chain = vec![
            entry("ZERO_BID", dec!(694), dec!(0), dec!(0.42), 0.40),
            entry("ZERO_ASK", dec!(694), dec!(0.41), dec!(0), 0.40),
            entry("LIVE", dec!(695), dec!(0.30), dec!(0.32), 0.38),
        ];
        let best = rank_chain(&chain, 0.40, 10.0, dec!(694.50)).unwrap();
        assert_eq!(best.symbol, "LIVE");
    }

    #[test]
    fn rejects_wide_spreads() {
        // Spread 50% of mid: over the 10% cap even with a perfect delta.
        let chain = vec![
            entry("WIDE", dec!(694), dec!(0.30), dec!(0.50), 0.40),
            entry("TIGHT", dec!(696), dec!(0.20), dec!(0.21), 0.30),
        ];
        let best = rank_chain(&chain, 0.40, 10.0, dec!(694.50)).unwrap();
        assert_eq!(best.symbol, "TIGHT");
    }

    #[test]
    fn tie_breaks_on_spread_then_strike() {
        // Same delta distance and near-equal scores: 694 has the tighter
        // spread and wins.
        let chain = vec![
            entry("A", dec!(693), dec!(0.400), dec!(0.440), 0.40),
            entry("B", dec!(694), dec!(0.400), dec!(0.404), 0.40),
        ];
        let best = rank_chain(&chain, 0.40, 15.0, dec!(694.00)).unwrap();
        assert_eq!(best.symbol, "B");
    }

    #[test]
    fn empty_chain_yields_none() {
        assert!(rank_chain(&[], 0.40, 10.0, dec!(694)).is_none());
    }

    #[test]
    fn put_deltas_use_absolute_value() {
        let chain = vec![
            entry("P694", dec!(694), dec!(0.41), dec!(0.42), -0.48),
            entry("P690", dec!(690), dec!(0.20), dec!(0.21), -0.25),
        ];
        let best = rank_chain(&chain, 0.40, 10.0, dec!(694.00)).unwrap();
        assert_eq!(best.symbol, "P694");
    }
}
