use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Call => Self::Put,
            Self::Put => Self::Call,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The named intraday strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EmaCross,
    VwapCross,
    EmaVwap,
    Orb,
    OrbDirectional,
    VwapRsi,
    BbSqueeze,
    RsiReversal,
    Confluence,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmaCross => "ema_cross",
            Self::VwapCross => "vwap_cross",
            Self::EmaVwap => "ema_vwap",
            Self::Orb => "orb",
            Self::OrbDirectional => "orb_directional",
            Self::VwapRsi => "vwap_rsi",
            Self::BbSqueeze => "bb_squeeze",
            Self::RsiReversal => "rsi_reversal",
            Self::Confluence => "confluence",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ema_cross" => Some(Self::EmaCross),
            "vwap_cross" => Some(Self::VwapCross),
            "ema_vwap" => Some(Self::EmaVwap),
            "orb" => Some(Self::Orb),
            "orb_directional" => Some(Self::OrbDirectional),
            "vwap_rsi" => Some(Self::VwapRsi),
            "bb_squeeze" => Some(Self::BbSqueeze),
            "rsi_reversal" => Some(Self::RsiReversal),
            "confluence" => Some(Self::Confluence),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunable strategy parameters. Persisted as JSON on each enabled strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalParams {
    pub kind: SignalKind,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// 0 disables the RSI veto filter for non-RSI strategies.
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub orb_minutes: i64,
    /// Minimum candle body as a fraction of the opening range.
    pub orb_body_min_pct: f64,
    pub orb_vwap_filter: bool,
    pub orb_gap_fade_filter: bool,
    pub bb_period: usize,
    pub bb_std_mult: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub vol_sma_period: usize,
    pub vol_threshold: f64,
    pub min_confluence: i32,
    pub pivot_enabled: bool,
    pub pivot_proximity_pct: f64,
    pub pivot_filter_enabled: bool,
    /// Bars of same-direction follow-through required before firing.
    /// 0 fires immediately at the signal bar close.
    pub confirm_bars: usize,
    // Per-trade exit overrides carried through admission onto the trade.
    pub stop_loss_percent: Option<f64>,
    pub profit_target_percent: Option<f64>,
    pub trailing_stop_percent: Option<f64>,
    pub max_hold_minutes: Option<i64>,
    pub atr_stop_mult: Option<f64>,
    pub atr_period: Option<usize>,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            kind: SignalKind::EmaCross,
            ema_fast: 8,
            ema_slow: 21,
            rsi_period: 0,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            orb_minutes: 15,
            orb_body_min_pct: 0.4,
            orb_vwap_filter: true,
            orb_gap_fade_filter: true,
            bb_period: 20,
            bb_std_mult: 2.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            vol_sma_period: 20,
            vol_threshold: 1.5,
            min_confluence: 5,
            pivot_enabled: false,
            pivot_proximity_pct: 0.3,
            pivot_filter_enabled: false,
            confirm_bars: 0,
            stop_loss_percent: None,
            profit_target_percent: None,
            trailing_stop_percent: None,
            max_hold_minutes: None,
            atr_stop_mult: None,
            atr_period: None,
        }
    }
}

impl SignalParams {
    #[must_use]
    pub fn for_kind(kind: SignalKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// RSI period used by confluence scoring when none is configured.
    #[must_use]
    pub fn effective_rsi_period(&self) -> usize {
        if self.rsi_period > 0 {
            self.rsi_period
        } else {
            9
        }
    }
}

/// Prior-session context for pivot levels and the gap-fade filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionContext {
    pub prev_high: Option<f64>,
    pub prev_low: Option<f64>,
    pub prev_close: Option<f64>,
}
