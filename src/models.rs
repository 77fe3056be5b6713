use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized daily bar. Only the normalizer constructs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// An untyped daily record as delivered by the market data API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBar {
    #[serde(alias = "Code", alias = "code", alias = "Symbol", default)]
    pub symbol: Option<String>,
    #[serde(alias = "Date", default)]
    pub date: Option<String>,
    #[serde(alias = "Open", alias = "O", default)]
    pub open: Option<Value>,
    #[serde(alias = "High", alias = "H", default)]
    pub high: Option<Value>,
    #[serde(alias = "Low", alias = "L", default)]
    pub low: Option<Value>,
    #[serde(alias = "Close", alias = "C", default)]
    pub close: Option<Value>,
    #[serde(alias = "AdjustmentOpen", alias = "AdjO", default)]
    pub adjusted_open: Option<Value>,
    #[serde(alias = "AdjustmentHigh", alias = "AdjH", default)]
    pub adjusted_high: Option<Value>,
    #[serde(alias = "AdjustmentLow", alias = "AdjL", default)]
    pub adjusted_low: Option<Value>,
    #[serde(alias = "AdjustmentClose", alias = "AdjC", default)]
    pub adjusted_close: Option<Value>,
}

/// Ordered bars for a single symbol. Never mutated after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl SymbolSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// The last `count` bars (or fewer when the series is shorter).
    pub fn trailing(&self, count: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(count);
        &self.bars[start..]
    }

    /// A copy of the series keeping only bars whose date passes `keep`.
    pub fn filtered<F>(&self, mut keep: F) -> SymbolSeries
    where
        F: FnMut(&Bar) -> bool,
    {
        SymbolSeries {
            symbol: self.symbol.clone(),
            bars: self.bars.iter().filter(|bar| keep(bar)).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub latest_close: f64,
    pub latest_date: NaiveDate,
    pub window_high: f64,
    pub window_low: f64,
    pub days_since_window_high: usize,
    pub month_low: f64,
    pub prior_window_high: Option<f64>,
    pub prior_window_low: Option<f64>,
    /// r14: 14-bar high over 14-bar low.
    pub breakout_ratio: f64,
    /// r30: latest close over the 30-bar low.
    pub month_breakout_ratio: f64,
    pub long_term_drop_pct: f64,
    pub long_term_rise_ratio: f64,
    pub push_target: f64,
    pub reach_pct: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFlags {
    pub is_double_top: bool,
    pub is_head_shoulders: bool,
    pub is_double_bottom: bool,
    pub is_support_hug: bool,
}

impl PatternFlags {
    /// True when a bearish reversal geometry vetoes candidacy.
    pub fn has_bearish_reversal(&self) -> bool {
        self.is_double_top || self.is_head_shoulders
    }
}

/// Static per-symbol reference data from the listed-company master.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    #[serde(alias = "Code")]
    pub symbol: String,
    #[serde(alias = "CompanyName", default)]
    pub company_name: Option<String>,
    #[serde(alias = "Sector", default)]
    pub sector: Option<String>,
    #[serde(alias = "Market", default)]
    pub market_tier: Option<String>,
    #[serde(default)]
    pub listing_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_known_one_year_ago: bool,
    #[serde(default)]
    pub risk_disclosure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub metrics: WindowMetrics,
    pub patterns: PatternFlags,
    pub reference: Option<ReferenceInfo>,
    pub satisfaction_ratio: f64,
    /// Sell targets at +3%, +5% and +8% over the push target.
    pub take_profit_levels: [f64; 3],
}

/// An open backtest position. Lives only between an entry and its exit.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub entry_index: usize,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub reference_high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    IntradayStop,
    TakeProfit,
    CloseStop,
    TimeLimit,
    EndOfData,
}

/// A closed backtest trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub holding_days: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pct_return: f64,
    pub notional_return: f64,
    pub exit_reason: ExitReason,
}

/// Why a symbol was left out of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSkip {
    pub symbol: String,
    pub reason: String,
}

pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
