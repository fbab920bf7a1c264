//! Pure indicator functions over bar sequences.
//!
//! Every function returns `None` entries until its warmup period is
//! satisfied; signal evaluation gates on this before firing. Deterministic,
//! no I/O.

use chrono::Timelike;

use daytrader_market_data::Bar;

/// Exponential moving average. First value is the SMA seed at index
/// `period - 1`.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || values.len() < period {
        return vec![None; values.len()];
    }

    let mut result: Vec<Option<f64>> = vec![None; period - 1];
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    result.push(Some(seed));

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for value in &values[period..] {
        prev = value * k + prev * (1.0 - k);
        result.push(Some(prev));
    }
    result
}

/// Wilder's RSI.
#[must_use]
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || closes.len() < period + 1 {
        return vec![None; closes.len()];
    }

    let mut result: Vec<Option<f64>> = vec![None; period];

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        avg_gain += delta.max(0.0);
        avg_loss += (-delta).max(0.0);
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let rsi_from = |gain: f64, loss: f64| {
        let rs = if loss > 0.0 { gain / loss } else { 100.0 };
        100.0 - 100.0 / (1.0 + rs)
    };
    result.push(Some(rsi_from(avg_gain, avg_loss)));

    for i in period + 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        avg_gain = (avg_gain * (period as f64 - 1.0) + delta.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + (-delta).max(0.0)) / period as f64;
        result.push(Some(rsi_from(avg_gain, avg_loss)));
    }
    result
}

/// Average True Range with Wilder smoothing.
#[must_use]
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    if period == 0 || bars.len() < period + 1 {
        return vec![None; bars.len()];
    }

    let mut true_ranges = vec![0.0];
    for i in 1..bars.len() {
        let (h, l, pc) = (bars[i].high, bars[i].low, bars[i - 1].close);
        true_ranges.push((h - l).max((h - pc).abs()).max((l - pc).abs()));
    }

    let mut result: Vec<Option<f64>> = vec![None; period];
    let mut value: f64 = true_ranges[1..=period].iter().sum::<f64>() / period as f64;
    result.push(Some(value));

    for tr in &true_ranges[period + 1..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
        result.push(Some(value));
    }
    result
}

/// Session-anchored VWAP. The accumulator resets whenever the bar's session
/// date changes, even across gaps in the bar sequence.
#[must_use]
pub fn session_vwap(bars: &[Bar]) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(bars.len());
    let mut cum_tp_vol = 0.0;
    let mut cum_vol = 0.0;
    let mut session = None;

    for bar in bars {
        let date = bar.timestamp.date_naive();
        if session != Some(date) {
            session = Some(date);
            cum_tp_vol = 0.0;
            cum_vol = 0.0;
        }
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        cum_tp_vol += typical * bar.volume as f64;
        cum_vol += bar.volume as f64;
        result.push(if cum_vol > 0.0 {
            Some(cum_tp_vol / cum_vol)
        } else {
            None
        });
    }
    result
}

pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub mid: Vec<Option<f64>>,
}

#[must_use]
pub fn bollinger(closes: &[f64], period: usize, std_mult: f64) -> BollingerBands {
    let n = closes.len();
    let mut bands = BollingerBands {
        upper: vec![None; n],
        lower: vec![None; n],
        mid: vec![None; n],
    };
    if period == 0 {
        return bands;
    }

    for i in period.saturating_sub(1)..n {
        let window = &closes[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = var.sqrt();
        bands.mid[i] = Some(mean);
        bands.upper[i] = Some(mean + std_mult * std);
        bands.lower[i] = Some(mean - std_mult * std);
    }
    bands
}

pub struct Macd {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

#[must_use]
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let n = closes.len();
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);

    let mut line: Vec<Option<f64>> = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (ema_fast[i], ema_slow[i]) {
            line[i] = Some(f - s);
        }
    }

    // Signal line is an EMA over the defined MACD values only.
    let macd_values: Vec<f64> = line.iter().filter_map(|v| *v).collect();
    let mut signal: Vec<Option<f64>> = vec![None; n];
    if macd_values.len() >= signal_period {
        let sig_ema = ema(&macd_values, signal_period);
        let mut j = 0;
        for i in 0..n {
            if line[i].is_some() {
                signal[i] = sig_ema.get(j).copied().flatten();
                j += 1;
            }
        }
    }

    let mut histogram: Vec<Option<f64>> = vec![None; n];
    for i in 0..n {
        if let (Some(l), Some(s)) = (line[i], signal[i]) {
            histogram[i] = Some(l - s);
        }
    }

    Macd {
        line,
        signal,
        histogram,
    }
}

/// Relative volume: bar volume divided by the mean volume of the `period`
/// bars strictly before it. Requires one prior full period.
#[must_use]
pub fn relative_volume(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut result = vec![None; n];
    if period == 0 {
        return result;
    }
    for i in period..n {
        let mean: f64 =
            bars[i - period..i].iter().map(|b| b.volume as f64).sum::<f64>() / period as f64;
        if mean > 0.0 {
            result[i] = Some(bars[i].volume as f64 / mean);
        }
    }
    result
}

/// Classic floor-trader pivot levels from prior-day OHLC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
    pub r2: f64,
    pub s2: f64,
}

#[must_use]
pub fn pivot_levels(prev_high: f64, prev_low: f64, prev_close: f64) -> PivotLevels {
    let p = (prev_high + prev_low + prev_close) / 3.0;
    PivotLevels {
        pivot: p,
        r1: 2.0 * p - prev_low,
        s1: 2.0 * p - prev_high,
        r2: p + (prev_high - prev_low),
        s2: p - (prev_high - prev_low),
    }
}

/// Opening range over the first `minutes` of the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpeningRange {
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
}

impl OpeningRange {
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    #[must_use]
    pub fn body_percent(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            return 0.0;
        }
        (self.close - self.open).abs() / range
    }

    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Computes the opening range from bars of a single session. Returns `None`
/// until at least one bar inside the window exists.
#[must_use]
pub fn opening_range(bars: &[Bar], minutes: i64) -> Option<OpeningRange> {
    let first = bars.first()?;
    let session_open = first
        .timestamp
        .with_hour(9)?
        .with_minute(30)?
        .with_second(0)?;
    let window_end = session_open + chrono::Duration::minutes(minutes);

    let in_window: Vec<&Bar> = bars
        .iter()
        .filter(|b| b.timestamp < window_end)
        .collect();
    let (first, last) = (in_window.first()?, in_window.last()?);
    Some(OpeningRange {
        high: in_window.iter().map(|b| b.high).fold(f64::MIN, f64::max),
        low: in_window.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        open: first.open,
        close: last.close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn bar_at(day: u32, h: u32, m: u32, o: f64, hi: f64, lo: f64, c: f64, v: u64) -> Bar {
        Bar {
            timestamp: New_York
                .with_ymd_and_hms(2026, 3, day, h, m, 0)
                .single()
                .unwrap(),
            open: o,
            high: hi,
            low: lo,
            close: c,
            volume: v,
        }
    }

    fn flat_bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar_at(2, 9, 30 + i as u32, c, c + 0.5, c - 0.5, c, 1_000))
            .collect()
    }

    #[test]
    fn ema_warmup_and_seed() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ema(&values, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0)); // SMA seed
        // k = 0.5: 4*0.5 + 2*0.5 = 3.0
        assert_eq!(out[3], Some(3.0));
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn ema_insufficient_data_is_all_none() {
        assert!(ema(&[1.0, 2.0], 5).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_monotone_gains_near_hundred() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + f64::from(i)).collect();
        let out = rsi(&closes, 14);
        assert!(out[13].is_none());
        let last = out.last().unwrap().unwrap();
        assert!(last > 99.0, "pure gains should push RSI to ~100, got {last}");
    }

    #[test]
    fn rsi_alternating_is_balanced() {
        let closes: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let last = rsi(&closes, 14).last().unwrap().unwrap();
        assert!((30.0..70.0).contains(&last), "got {last}");
    }

    #[test]
    fn atr_wilder_smoothing() {
        // Constant true range of 1.0 keeps ATR at 1.0.
        let bars: Vec<Bar> = (0..20)
            .map(|i| bar_at(2, 10, i, 100.0, 100.5, 99.5, 100.0, 1_000))
            .collect();
        let out = atr(&bars, 14);
        assert!(out[13].is_none());
        assert!((out[14].unwrap() - 1.0).abs() < 1e-9);
        assert!((out.last().unwrap().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_resets_on_session_change() {
        let bars = vec![
            bar_at(2, 15, 55, 100.0, 100.0, 100.0, 100.0, 1_000),
            bar_at(3, 9, 30, 200.0, 200.0, 200.0, 200.0, 1_000),
        ];
        let out = session_vwap(&bars);
        assert_eq!(out[0], Some(100.0));
        // New session: prior day's volume does not bleed in.
        assert_eq!(out[1], Some(200.0));
    }

    #[test]
    fn bollinger_bands_bracket_mean() {
        let closes = vec![10.0; 25];
        let bands = bollinger(&closes, 20, 2.0);
        assert!(bands.upper[18].is_none());
        assert_eq!(bands.mid[19], Some(10.0));
        assert_eq!(bands.upper[24], Some(10.0)); // zero variance
    }

    #[test]
    fn macd_histogram_sign_tracks_trend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + f64::from(i) * 0.5).collect();
        let out = macd(&closes, 12, 26, 9);
        let hist = out.histogram.last().unwrap().unwrap();
        assert!(hist > 0.0, "rising series should have positive histogram");
    }

    #[test]
    fn relative_volume_excludes_current_bar() {
        let mut bars = flat_bars(&vec![100.0; 12]);
        for b in &mut bars {
            b.volume = 1_000;
        }
        bars[11].volume = 3_000;
        let out = relative_volume(&bars, 10);
        assert!(out[9].is_none());
        // Mean of prior 10 bars is 1000, so the spike reads 3.0x.
        assert_eq!(out[11], Some(3.0));
    }

    #[test]
    fn pivot_levels_classic_formula() {
        let p = pivot_levels(110.0, 100.0, 105.0);
        assert!((p.pivot - 105.0).abs() < 1e-9);
        assert!((p.r1 - 110.0).abs() < 1e-9);
        assert!((p.s1 - 100.0).abs() < 1e-9);
        assert!((p.r2 - 115.0).abs() < 1e-9);
        assert!((p.s2 - 95.0).abs() < 1e-9);
    }

    #[test]
    fn opening_range_first_fifteen_minutes() {
        let bars = vec![
            bar_at(2, 9, 30, 100.0, 101.0, 99.5, 100.8, 1_000),
            bar_at(2, 9, 35, 100.8, 101.5, 100.5, 101.2, 1_000),
            bar_at(2, 9, 40, 101.2, 101.4, 100.9, 101.0, 1_000),
            bar_at(2, 9, 45, 101.0, 103.0, 100.9, 102.8, 1_000),
        ];
        let orb = opening_range(&bars, 15).unwrap();
        assert_eq!(orb.high, 101.5);
        assert_eq!(orb.low, 99.5);
        assert_eq!(orb.open, 100.0);
        assert_eq!(orb.close, 101.0);
        assert!(orb.is_bullish());
    }

    #[test]
    fn opening_range_empty_input() {
        assert!(opening_range(&[], 15).is_none());
    }
}
