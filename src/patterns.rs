use crate::models::{Bar, PatternFlags};

pub const DOUBLE_TOP_MIN_BARS: usize = 15;
pub const HEAD_SHOULDERS_MIN_BARS: usize = 20;
pub const DOUBLE_BOTTOM_MIN_BARS: usize = 15;

const TWIN_SEPARATION: usize = 3;
const SHOULDER_SEPARATION: usize = 2;
const SUPPORT_HUG_BAND: f64 = 1.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtremumKind {
    Peak,
    Valley,
}

/// Lazily walks the interior points of a series, yielding `(index, value)` for
/// each local peak (or valley) that sits more than `min_separation` bars after
/// the previously yielded one.
pub struct Extrema<'a> {
    values: &'a [f64],
    index: usize,
    min_separation: usize,
    last_kept: Option<usize>,
    kind: ExtremumKind,
}

impl<'a> Extrema<'a> {
    fn new(values: &'a [f64], min_separation: usize, kind: ExtremumKind) -> Self {
        Self {
            values,
            index: 1,
            min_separation,
            last_kept: None,
            kind,
        }
    }

    fn is_extremum(&self, i: usize) -> bool {
        let neighbourhood = &self.values[i - 1..=i + 1];
        let value = self.values[i];
        match self.kind {
            ExtremumKind::Peak => neighbourhood.iter().all(|v| value >= *v),
            ExtremumKind::Valley => neighbourhood.iter().all(|v| value <= *v),
        }
    }
}

impl Iterator for Extrema<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index + 1 < self.values.len() {
            let i = self.index;
            self.index += 1;
            if !self.is_extremum(i) {
                continue;
            }
            if is_separated(self.last_kept, i, self.min_separation) {
                self.last_kept = Some(i);
                return Some((i, self.values[i]));
            }
        }
        None
    }
}

pub fn local_peaks(highs: &[f64], min_separation: usize) -> Extrema<'_> {
    Extrema::new(highs, min_separation, ExtremumKind::Peak)
}

pub fn local_valleys(lows: &[f64], min_separation: usize) -> Extrema<'_> {
    Extrema::new(lows, min_separation, ExtremumKind::Valley)
}

fn is_separated(previous: Option<usize>, index: usize, min_separation: usize) -> bool {
    match previous {
        Some(prev) => index > prev && index - prev > min_separation,
        None => true,
    }
}

fn well_formed(columns: &[&[f64]], min_len: usize) -> bool {
    let Some(first) = columns.first() else {
        return false;
    };
    let len = first.len();
    len >= min_len
        && columns
            .iter()
            .all(|column| column.len() == len && column.iter().all(|v| v.is_finite()))
}

fn slice_min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn slice_max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Two similar highs with a real trough between them and price now below the
/// second high.
pub fn is_double_top(highs: &[f64], lows: &[f64], closes: &[f64]) -> bool {
    if !well_formed(&[highs, lows, closes], DOUBLE_TOP_MIN_BARS) {
        return false;
    }

    let mut peaks: Vec<(usize, f64)> = local_peaks(highs, TWIN_SEPARATION).collect();
    let last = highs.len() - 1;
    if highs[last] > highs[last - 1]
        && is_separated(peaks.last().map(|p| p.0), last, TWIN_SEPARATION)
    {
        peaks.push((last, highs[last]));
    }

    let [.., (p1_idx, p1), (p2_idx, p2)] = peaks[..] else {
        return false;
    };
    if (p2 - p1).abs() / p1.max(p2) >= 0.05 {
        return false;
    }
    let trough = slice_min(&lows[p1_idx..=p2_idx]).unwrap_or(p1);
    if trough >= p1.min(p2) * 0.95 {
        return false;
    }
    closes[last] < p2 * 0.97
}

/// A higher middle peak between two shoulders of similar height, with price
/// now below the right shoulder.
pub fn is_head_and_shoulders(highs: &[f64], closes: &[f64]) -> bool {
    if !well_formed(&[highs, closes], HEAD_SHOULDERS_MIN_BARS) {
        return false;
    }

    let peaks: Vec<(usize, f64)> = local_peaks(highs, SHOULDER_SEPARATION).collect();
    let [.., (_, left), (_, head), (_, right)] = peaks[..] else {
        return false;
    };
    if head <= left || head <= right {
        return false;
    }
    if (right - left).abs() / left.max(right) >= 0.10 {
        return false;
    }
    closes[closes.len() - 1] < right * 0.97
}

/// Two similar lows with a real rally between them and price now back above the
/// second low.
pub fn is_double_bottom(highs: &[f64], lows: &[f64], closes: &[f64]) -> bool {
    if !well_formed(&[highs, lows, closes], DOUBLE_BOTTOM_MIN_BARS) {
        return false;
    }

    let mut valleys: Vec<(usize, f64)> = local_valleys(lows, TWIN_SEPARATION).collect();
    let n = lows.len();
    let penultimate = n - 2;
    let tail_low = slice_min(&lows[n - 3..]).unwrap_or(lows[penultimate]);
    if lows[penultimate] == tail_low
        && is_separated(valleys.last().map(|v| v.0), penultimate, TWIN_SEPARATION)
    {
        valleys.push((penultimate, lows[penultimate]));
    }

    let [.., (v1_idx, v1), (v2_idx, v2)] = valleys[..] else {
        return false;
    };
    let floor = v1.min(v2);
    if floor <= 0.0 || (v2 - v1).abs() / floor >= 0.05 {
        return false;
    }
    let rally = slice_max(&highs[v1_idx..=v2_idx]).unwrap_or(v1);
    if rally <= v1.max(v2) * 1.04 {
        return false;
    }
    closes[n - 1] > v2 * 1.01
}

/// Classifies the geometry of a (usually 30-bar) window. `window_low` is the
/// 14-bar low used for the support-hug flag.
pub fn detect_patterns(window: &[Bar], window_low: f64) -> PatternFlags {
    let highs: Vec<f64> = window.iter().map(|bar| bar.high).collect();
    let lows: Vec<f64> = window.iter().map(|bar| bar.low).collect();
    let closes: Vec<f64> = window.iter().map(|bar| bar.close).collect();

    let is_double_top = is_double_top(&highs, &lows, &closes);
    let is_head_shoulders = is_head_and_shoulders(&highs, &closes);
    let is_double_bottom = is_double_bottom(&highs, &lows, &closes);
    let is_support_hug = !is_double_top
        && !is_head_shoulders
        && closes
            .last()
            .map(|close| *close <= window_low * SUPPORT_HUG_BAND)
            .unwrap_or(false);

    PatternFlags {
        is_double_top,
        is_head_shoulders,
        is_double_bottom,
        is_support_hug,
    }
}
