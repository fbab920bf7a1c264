//! Per-strategy signal worker.
//!
//! One worker owns one enabled (ticker, timeframe, signal_type) tuple. It
//! feeds the bar aggregator from the streaming quote cache, evaluates its
//! strategy at every bar close, and pushes resulting signals through the
//! admission pipeline as internal alerts.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};

use daytrader_broker::BrokerClient;
use daytrader_engine::{
    Admission, AdmissionPipeline, ConfluenceInfo, ExitOverrides, IncomingAlert,
};
use daytrader_indicators as ind;
use daytrader_market_data::{Bar, BarAggregator, QuoteCache, QuoteKind, Timeframe};
use daytrader_signals::{SessionContext, Signal, SignalEngine, SignalParams};

/// How often the worker samples the quote stream into ticks.
const POLL_SECS: u64 = 5;
/// Bars of history handed to the evaluator.
const LOOKBACK_BARS: usize = 120;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub ticker: String,
    pub timeframe: Timeframe,
    pub signal_type: String,
    pub params: SignalParams,
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub aggregator: Arc<BarAggregator>,
    pub cache: Arc<QuoteCache>,
    pub broker: Arc<dyn BrokerClient>,
    pub pipeline: Arc<AdmissionPipeline>,
    pub atr_period_default: usize,
}

pub struct StrategyWorker {
    config: WorkerConfig,
    deps: WorkerDeps,
    engine: SignalEngine,
    bars_rx: mpsc::UnboundedReceiver<Bar>,
    shutdown: watch::Receiver<bool>,
    today: Option<NaiveDate>,
    last_day_volume: u64,
}

impl StrategyWorker {
    #[must_use]
    pub fn spawn(
        config: WorkerConfig,
        deps: WorkerDeps,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        deps.cache.subscribe(&config.ticker, QuoteKind::Equity);
        deps.aggregator.track(&config.ticker, config.timeframe);

        let (bars_tx, bars_rx) = mpsc::unbounded_channel();
        deps.aggregator
            .on_bar_close(&config.ticker, config.timeframe, move |bar| {
                let _ = bars_tx.send(bar.clone());
            });

        let engine = SignalEngine::new(config.params.clone(), SessionContext::default());
        let worker = Self {
            config,
            deps,
            engine,
            bars_rx,
            shutdown: shutdown_rx,
            today: None,
            last_day_volume: 0,
        };
        let handle = tokio::spawn(worker.run());
        (shutdown_tx, handle)
    }

    async fn run(mut self) {
        tracing::info!(
            ticker = self.config.ticker,
            timeframe = %self.config.timeframe,
            signal_type = self.config.signal_type,
            "Strategy worker started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(std::time::Duration::from_secs(POLL_SECS)) => {}
                _ = self.shutdown.changed() => break,
            }
            if *self.shutdown.borrow() {
                break;
            }
            self.poll().await;
        }

        self.deps
            .aggregator
            .untrack(&self.config.ticker, self.config.timeframe);
        tracing::info!(
            ticker = self.config.ticker,
            signal_type = self.config.signal_type,
            "Strategy worker stopped"
        );
    }

    async fn poll(&mut self) {
        let now_et = daytrader_core::now_eastern();
        let today = now_et.date_naive();

        if today.weekday().num_days_from_monday() >= 5 {
            return;
        }
        if self.today != Some(today) {
            self.reset_day(today).await;
        }

        let time = now_et.time();
        if time < daytrader_core::market_open() || time >= daytrader_core::market_close() {
            return;
        }

        // Sample the stream into the aggregator and close stalled bars.
        if let Some(snap) = self.deps.cache.get(&self.config.ticker) {
            if snap.last > Decimal::ZERO {
                use rust_decimal::prelude::ToPrimitive;
                let price = snap.last.to_f64().unwrap_or(0.0);
                let tick_volume = snap.day_volume.saturating_sub(self.last_day_volume);
                self.last_day_volume = snap.day_volume;
                self.deps
                    .aggregator
                    .ingest_tick(&self.config.ticker, now_et, price, tick_volume);
            }
        }
        self.deps.aggregator.poll_clock(now_et);

        // Evaluate completed bars; admit at most one signal per poll.
        while let Ok(_closed) = self.bars_rx.try_recv() {
            let bars = self
                .deps
                .aggregator
                .last_bars(&self.config.ticker, self.config.timeframe, LOOKBACK_BARS);
            if let Some(signal) = self.engine.on_bar_close(&bars) {
                self.fire(&signal, &bars).await;
                break;
            }
        }
    }

    /// New session: reset evaluator state and rebuild the prior-day context
    /// from the equity quote's day change.
    async fn reset_day(&mut self, today: NaiveDate) {
        self.today = Some(today);
        self.last_day_volume = 0;

        let prev_close = match self.deps.broker.equity_quote(&self.config.ticker).await {
            Ok(quote) if quote.last > Decimal::ZERO => {
                use rust_decimal::prelude::ToPrimitive;
                (quote.last - quote.change).to_f64()
            }
            _ => None,
        };
        self.engine.reset_day(SessionContext {
            prev_close,
            prev_high: None,
            prev_low: None,
        });
        tracing::info!(
            ticker = self.config.ticker,
            signal_type = self.config.signal_type,
            %today,
            prev_close,
            "Strategy worker day reset"
        );
    }

    async fn fire(&self, signal: &Signal, bars: &[Bar]) {
        tracing::info!(
            ticker = self.config.ticker,
            direction = signal.direction.as_str(),
            price = signal.underlying_price,
            reason = signal.reason,
            "Strategy signal fired"
        );

        let params = self.engine.params();
        let atr_period = params.atr_period.unwrap_or(self.deps.atr_period_default);
        let entry_atr = ind::atr(bars, atr_period)
            .last()
            .copied()
            .flatten()
            .and_then(Decimal::from_f64);

        let confluence = signal.confluence_score.map(|score| ConfluenceInfo {
            score,
            max_score: signal.confluence_max.unwrap_or(score),
            relative_volume: signal.relative_volume,
        });

        let incoming = IncomingAlert {
            ticker: self.config.ticker.clone(),
            action: match signal.direction {
                daytrader_signals::Direction::Call => "BUY_CALL".to_string(),
                daytrader_signals::Direction::Put => "BUY_PUT".to_string(),
            },
            price: Decimal::from_f64(signal.underlying_price),
            secret: None,
            raw_payload: serde_json::json!({
                "source": "internal_strategy",
                "ticker": self.config.ticker,
                "signal_type": self.config.signal_type,
                "timeframe": self.config.timeframe.as_str(),
                "reason": signal.reason,
                "price": signal.underlying_price,
            })
            .to_string(),
            source: "internal_strategy".to_string(),
            confluence,
            exit_overrides: ExitOverrides {
                stop_loss_percent: params.stop_loss_percent.and_then(Decimal::from_f64),
                profit_target_percent: params.profit_target_percent.and_then(Decimal::from_f64),
                trailing_stop_percent: params.trailing_stop_percent.and_then(Decimal::from_f64),
                max_hold_minutes: params.max_hold_minutes,
                atr_stop_mult: params.atr_stop_mult.and_then(Decimal::from_f64),
            },
            entry_atr,
        };

        match self.deps.pipeline.process(incoming).await {
            Ok(Admission::Accepted { trade_id, .. }) => {
                tracing::info!(trade_id, ticker = self.config.ticker, "Strategy signal admitted");
            }
            Ok(Admission::Rejected { reason, .. }) => {
                tracing::info!(ticker = self.config.ticker, reason, "Strategy signal rejected");
            }
            Ok(Admission::Errored { message }) => {
                tracing::warn!(ticker = self.config.ticker, message, "Strategy signal errored");
            }
            Err(err) => {
                tracing::error!(ticker = self.config.ticker, %err, "Admission pipeline failure");
            }
        }
    }
}
