use crate::error::PipelineError;
use crate::models::{Bar, SymbolSeries, WindowMetrics};

/// Bars in the short breakout window.
pub const WINDOW_BARS: usize = 14;
/// Bars in the month window; always contains the short window.
pub const MONTH_BARS: usize = 30;

/// Highest high and lowest low of a window, with the position of the first
/// maximal high.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowExtrema {
    pub high: f64,
    pub low: f64,
    pub high_index: usize,
}

impl WindowExtrema {
    /// Bars strictly after the first bar that made the high.
    pub fn bars_since_high(&self, window_len: usize) -> usize {
        window_len.saturating_sub(self.high_index + 1)
    }
}

pub fn window_extrema(window: &[Bar]) -> Option<WindowExtrema> {
    let first = window.first()?;
    let mut extrema = WindowExtrema {
        high: first.high,
        low: first.low,
        high_index: 0,
    };
    for (index, bar) in window.iter().enumerate().skip(1) {
        if bar.high > extrema.high {
            extrema.high = bar.high;
            extrema.high_index = index;
        }
        if bar.low < extrema.low {
            extrema.low = bar.low;
        }
    }
    Some(extrema)
}

/// `numerator / denominator`, or 0 when the denominator is not positive.
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 && denominator.is_finite() && numerator.is_finite() {
        numerator / denominator
    } else {
        0.0
    }
}

/// Price `push_pct` percent of the way down from the high to the low.
pub fn push_target(high: f64, low: f64, push_pct: f64) -> f64 {
    high - (high - low) * push_pct / 100.0
}

/// How far the close has travelled from the high towards the push target, in
/// percent. 0 at the high, 100 at the target, above 100 past it.
pub fn reach_pct(high: f64, target: f64, close: f64) -> f64 {
    let span = high - target;
    if span <= 0.0 {
        return 0.0;
    }
    (high - close) / span * 100.0
}

fn max_high(bars: &[Bar]) -> Option<f64> {
    bars.iter().map(|bar| bar.high).reduce(f64::max)
}

fn min_low(bars: &[Bar]) -> Option<f64> {
    bars.iter().map(|bar| bar.low).reduce(f64::min)
}

pub fn compute_metrics(
    series: &SymbolSeries,
    push_pct: f64,
) -> Result<WindowMetrics, PipelineError> {
    let available = series.len();
    if available < WINDOW_BARS {
        return Err(PipelineError::InsufficientHistory {
            symbol: series.symbol.clone(),
            required: WINDOW_BARS,
            available,
        });
    }

    let bars = &series.bars;
    let latest = &bars[available - 1];
    let window = &bars[available - WINDOW_BARS..];
    let month_start = available.saturating_sub(MONTH_BARS);
    let month = &bars[month_start..];
    let prior = &bars[..month_start];

    let extrema = window_extrema(window).ok_or_else(|| PipelineError::MissingData {
        symbol: series.symbol.clone(),
        reason: "empty window".to_string(),
    })?;
    let month_low = min_low(month).unwrap_or(extrema.low);
    let prior_window_high = max_high(prior);
    let prior_window_low = min_low(prior);

    let target = push_target(extrema.high, extrema.low, push_pct);

    let long_term_drop_pct = match prior_window_high {
        Some(high) if high > 0.0 => (latest.close / high - 1.0) * 100.0,
        _ => 0.0,
    };
    let long_term_rise_ratio = prior_window_low
        .map(|low| ratio_or_zero(latest.close, low))
        .unwrap_or(0.0);

    Ok(WindowMetrics {
        latest_close: latest.close,
        latest_date: latest.date,
        window_high: extrema.high,
        window_low: extrema.low,
        days_since_window_high: extrema.bars_since_high(window.len()),
        month_low,
        prior_window_high,
        prior_window_low,
        breakout_ratio: ratio_or_zero(extrema.high, extrema.low),
        month_breakout_ratio: ratio_or_zero(latest.close, month_low),
        long_term_drop_pct,
        long_term_rise_ratio,
        push_target: target,
        reach_pct: reach_pct(extrema.high, target, latest.close),
    })
}
