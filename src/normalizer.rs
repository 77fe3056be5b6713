use crate::models::{Bar, RawBar, SymbolSeries};
use chrono::NaiveDate;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

/// Symbols whose bars survived normalization, plus a count of dropped rows.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub series: HashMap<String, SymbolSeries>,
    pub dropped_rows: usize,
}

/// Coerces an API price cell into a finite number.
pub fn coerce_price(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub fn parse_bar_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        return Some(date);
    }
    // Timestamps such as 2024-03-01T00:00:00Z
    trimmed
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Normalizes a symbol code by trimming whitespace and uppercasing. Four-character
/// master-list codes get the trailing check digit the bar feed uses.
pub fn canonical_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        return None;
    }
    if normalized.len() == 4 && normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(format!("{}0", normalized));
    }
    Some(normalized)
}

fn pick_price(adjusted: &Option<Value>, raw: &Option<Value>) -> Option<f64> {
    adjusted
        .as_ref()
        .and_then(coerce_price)
        .or_else(|| raw.as_ref().and_then(coerce_price))
}

pub fn satisfies_ohlc_invariant(open: f64, high: f64, low: f64, close: f64) -> bool {
    let values = [open, high, low, close];
    if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return false;
    }
    high >= open.max(close).max(low) && low <= open.min(close).min(high)
}

/// Converts one raw record into a bar, or `None` when the row is unusable.
pub fn normalize_bar(raw: &RawBar) -> Option<Bar> {
    let symbol = raw.symbol.as_deref().and_then(canonical_symbol)?;
    let date = raw.date.as_deref().and_then(parse_bar_date)?;
    let open = pick_price(&raw.adjusted_open, &raw.open)?;
    let high = pick_price(&raw.adjusted_high, &raw.high)?;
    let low = pick_price(&raw.adjusted_low, &raw.low)?;
    let close = pick_price(&raw.adjusted_close, &raw.close)?;

    if !satisfies_ohlc_invariant(open, high, low, close) {
        return None;
    }

    Some(Bar {
        symbol,
        date,
        open,
        high,
        low,
        close,
    })
}

/// Normalizes raw rows into date-ordered per-symbol series. A repeated date keeps
/// the first row seen for it.
pub fn normalize_records(raws: &[RawBar]) -> NormalizedBatch {
    let mut dropped_rows = 0usize;
    let mut bars = Vec::with_capacity(raws.len());
    for raw in raws {
        match normalize_bar(raw) {
            Some(bar) => bars.push(bar),
            None => dropped_rows += 1,
        }
    }

    let (series, duplicates) = build_series(bars);
    dropped_rows += duplicates;
    if dropped_rows > 0 {
        debug!(
            "Dropped {} of {} raw rows during normalization",
            dropped_rows,
            raws.len()
        );
    }

    NormalizedBatch {
        series,
        dropped_rows,
    }
}

/// Builds ordered series from already-validated bars, returning the number of
/// duplicate-date bars removed.
pub fn build_series(bars: Vec<Bar>) -> (HashMap<String, SymbolSeries>, usize) {
    let mut grouped: HashMap<String, Vec<Bar>> = HashMap::new();
    for bar in bars {
        grouped.entry(bar.symbol.clone()).or_default().push(bar);
    }

    let mut duplicates = 0usize;
    let series = grouped
        .into_iter()
        .map(|(symbol, mut bars)| {
            // Stable sort keeps arrival order among equal dates.
            bars.sort_by_key(|bar| bar.date);
            let before = bars.len();
            bars.dedup_by(|later, earlier| later.date == earlier.date);
            duplicates += before - bars.len();
            (symbol.clone(), SymbolSeries::new(symbol, bars))
        })
        .collect();

    (series, duplicates)
}
