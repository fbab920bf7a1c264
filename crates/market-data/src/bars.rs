//! Bar aggregation.
//!
//! Consumes ticks or minute bars per symbol and maintains a ring of the
//! last N completed OHLCV bars per (symbol, timeframe). A bar completes
//! when an ingested datum lands past its boundary or when the wall clock
//! (market local zone) is observed past the boundary via `poll_clock`.
//! Close handlers fire exactly once per completed bar, after the ring has
//! been updated.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M5,
    M15,
}

impl Timeframe {
    #[must_use]
    pub const fn minutes(self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV bar. `timestamp` is the bucket start in the market's local zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Tz>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    #[must_use]
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

type Handler = Arc<dyn Fn(&Bar) + Send + Sync>;
type SeriesKey = (String, Timeframe);

struct Series {
    current: Option<Bar>,
    ring: VecDeque<Bar>,
}

pub struct BarAggregator {
    capacity: usize,
    series: RwLock<HashMap<SeriesKey, Series>>,
    handlers: RwLock<HashMap<SeriesKey, Vec<Handler>>>,
}

/// Truncates a timestamp to the start of its timeframe bucket.
fn align(ts: DateTime<Tz>, timeframe: Timeframe) -> DateTime<Tz> {
    let minutes = i64::from(ts.hour()) * 60 + i64::from(ts.minute());
    let aligned = minutes - minutes % timeframe.minutes();
    let time = NaiveTime::from_hms_opt(
        u32::try_from(aligned / 60).unwrap_or(0),
        u32::try_from(aligned % 60).unwrap_or(0),
        0,
    )
    .unwrap_or_default();
    ts.timezone()
        .from_local_datetime(&ts.date_naive().and_time(time))
        .single()
        .unwrap_or(ts)
}

impl BarAggregator {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            series: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Starts maintaining bars for a (symbol, timeframe).
    pub fn track(&self, symbol: &str, timeframe: Timeframe) {
        self.series
            .write()
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(|| Series {
                current: None,
                ring: VecDeque::new(),
            });
    }

    /// Drops the series and its close handlers.
    pub fn untrack(&self, symbol: &str, timeframe: Timeframe) {
        let key = (symbol.to_string(), timeframe);
        self.series.write().remove(&key);
        self.handlers.write().remove(&key);
    }

    /// Registers a handler invoked once per completed bar.
    pub fn on_bar_close<F>(&self, symbol: &str, timeframe: Timeframe, handler: F)
    where
        F: Fn(&Bar) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .push(Arc::new(handler));
    }

    /// Feeds a tick into every tracked timeframe for the symbol.
    pub fn ingest_tick(&self, symbol: &str, ts: DateTime<Tz>, price: f64, volume: u64) {
        let completed = {
            let mut series = self.series.write();
            let mut completed = Vec::new();
            for ((sym, tf), state) in series.iter_mut() {
                if sym != symbol {
                    continue;
                }
                let bucket = align(ts, *tf);
                if let Some(bar) = Self::update_series(state, bucket, price, price, price, price, volume, self.capacity) {
                    completed.push(((sym.clone(), *tf), bar));
                }
            }
            completed
        };
        self.fire(completed);
    }

    /// Merges an exchange-provided minute bar into every tracked timeframe
    /// for the symbol.
    pub fn ingest_minute_bar(&self, symbol: &str, minute: &Bar) {
        let completed = {
            let mut series = self.series.write();
            let mut completed = Vec::new();
            for ((sym, tf), state) in series.iter_mut() {
                if sym != symbol {
                    continue;
                }
                let bucket = align(minute.timestamp, *tf);
                if let Some(bar) = Self::update_series(
                    state,
                    bucket,
                    minute.open,
                    minute.high,
                    minute.low,
                    minute.close,
                    minute.volume,
                    self.capacity,
                ) {
                    completed.push(((sym.clone(), *tf), bar));
                }
            }
            completed
        };
        self.fire(completed);
    }

    /// Completes any in-progress bar whose boundary the wall clock has
    /// crossed. Call from a periodic tick.
    pub fn poll_clock(&self, now: DateTime<Tz>) {
        let completed = {
            let mut series = self.series.write();
            let mut completed = Vec::new();
            for (key, state) in series.iter_mut() {
                let done = match &state.current {
                    Some(bar) => now >= bar.timestamp + Duration::minutes(key.1.minutes()),
                    None => false,
                };
                if done {
                    if let Some(bar) = state.current.take() {
                        state.ring.push_back(bar.clone());
                        while state.ring.len() > self.capacity {
                            state.ring.pop_front();
                        }
                        completed.push((key.clone(), bar));
                    }
                }
            }
            completed
        };
        self.fire(completed);
    }

    /// Last `n` completed bars, oldest first.
    #[must_use]
    pub fn last_bars(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Vec<Bar> {
        let series = self.series.read();
        let Some(state) = series.get(&(symbol.to_string(), timeframe)) else {
            return Vec::new();
        };
        let len = state.ring.len();
        state.ring.iter().skip(len.saturating_sub(n)).cloned().collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn update_series(
        state: &mut Series,
        bucket: DateTime<Tz>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        capacity: usize,
    ) -> Option<Bar> {
        let mut finished = None;
        match &mut state.current {
            Some(bar) if bar.timestamp == bucket => {
                bar.high = bar.high.max(high);
                bar.low = bar.low.min(low);
                bar.close = close;
                bar.volume += volume;
            }
            current => {
                if let Some(done) = current.take() {
                    state.ring.push_back(done.clone());
                    while state.ring.len() > capacity {
                        state.ring.pop_front();
                    }
                    finished = Some(done);
                }
                *current = Some(Bar {
                    timestamp: bucket,
                    open,
                    high,
                    low,
                    close,
                    volume,
                });
            }
        }
        finished
    }

    fn fire(&self, completed: Vec<(SeriesKey, Bar)>) {
        if completed.is_empty() {
            return;
        }
        let handlers = self.handlers.read().clone();
        for (key, bar) in completed {
            if let Some(list) = handlers.get(&key) {
                for handler in list {
                    handler(&bar);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn et(h: u32, m: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2026, 3, 2, h, m, 0).single().unwrap()
    }

    fn minute_bar(h: u32, m: u32, close: f64) -> Bar {
        Bar {
            timestamp: et(h, m),
            open: close - 0.2,
            high: close + 0.3,
            low: close - 0.4,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn aligns_to_five_minute_buckets() {
        assert_eq!(align(et(9, 33), Timeframe::M5), et(9, 30));
        assert_eq!(align(et(9, 35), Timeframe::M5), et(9, 35));
        assert_eq!(align(et(10, 44), Timeframe::M15), et(10, 30));
    }

    #[test]
    fn merges_minute_bars_into_five_minute_bar() {
        let agg = BarAggregator::new(100);
        agg.track("SPY", Timeframe::M5);

        for m in 30..35 {
            agg.ingest_minute_bar("SPY", &minute_bar(9, m, 694.0 + f64::from(m)));
        }
        // Next bucket completes the first bar.
        agg.ingest_minute_bar("SPY", &minute_bar(9, 35, 700.0));

        let bars = agg.last_bars("SPY", Timeframe::M5, 10);
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.timestamp, et(9, 30));
        assert_eq!(bar.close, 694.0 + 34.0);
        assert_eq!(bar.volume, 5_000);
    }

    #[test]
    fn poll_clock_completes_stalled_bar() {
        let agg = BarAggregator::new(100);
        agg.track("SPY", Timeframe::M5);
        agg.ingest_minute_bar("SPY", &minute_bar(9, 31, 694.5));

        agg.poll_clock(et(9, 34));
        assert!(agg.last_bars("SPY", Timeframe::M5, 10).is_empty());

        agg.poll_clock(et(9, 35));
        assert_eq!(agg.last_bars("SPY", Timeframe::M5, 10).len(), 1);
    }

    #[test]
    fn close_handler_fires_once_per_bar() {
        let agg = Arc::new(BarAggregator::new(100));
        agg.track("SPY", Timeframe::M1);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        agg.on_bar_close("SPY", Timeframe::M1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        agg.ingest_tick("SPY", et(9, 30), 694.0, 10);
        agg.ingest_tick("SPY", et(9, 30), 694.2, 10);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        agg.ingest_tick("SPY", et(9, 31), 694.4, 10);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        agg.poll_clock(et(9, 32));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_sees_ring_already_updated() {
        let agg = Arc::new(BarAggregator::new(100));
        agg.track("SPY", Timeframe::M1);
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_in_handler = observed.clone();
        let agg_for_handler = agg.clone();
        agg.on_bar_close("SPY", Timeframe::M1, move |_| {
            let bars = agg_for_handler.last_bars("SPY", Timeframe::M1, 10);
            observed_in_handler.store(bars.len(), Ordering::SeqCst);
        });

        agg.ingest_tick("SPY", et(9, 30), 694.0, 10);
        agg.ingest_tick("SPY", et(9, 31), 694.4, 10);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ring_is_bounded() {
        let agg = BarAggregator::new(3);
        agg.track("SPY", Timeframe::M1);
        for m in 0..10 {
            agg.ingest_minute_bar("SPY", &minute_bar(10, m, 694.0));
        }
        assert_eq!(agg.last_bars("SPY", Timeframe::M1, 100).len(), 3);
    }
}
