use crate::error::PipelineError;
use crate::models::{Bar, RawBar, ReferenceInfo, SymbolSeries};
use crate::normalizer::{build_series, canonical_symbol, normalize_records};
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    bars: Vec<Bar>,
    #[serde(default)]
    reference: Vec<ReferenceInfo>,
}

/// Daily-bars API payload: either a bare array or wrapped in `data`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBarPayload {
    Rows(Vec<RawBar>),
    Envelope { data: Vec<RawBar> },
}

/// Listed-company master payload: either a bare array or wrapped in `info`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReferencePayload {
    Rows(Vec<ReferenceInfo>),
    Envelope { info: Vec<ReferenceInfo> },
}

/// Inclusive date bounds; an open side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(anyhow!(
                    "Invalid market data date range: {} is after {}",
                    start,
                    end
                ));
            }
        }
        Ok(Self { start, end })
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    pub fn describe(&self) -> String {
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                format!("{} - {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
            }
            (Some(start), None) => format!("{} onward", start.format("%Y-%m-%d")),
            (None, Some(end)) => format!("through {}", end.format("%Y-%m-%d")),
            _ => "entire dataset".to_string(),
        }
    }
}

/// Synchronous boundary to whatever supplies normalized bars.
pub trait BarSource {
    /// Bars for `symbol` within `range`. An empty or unusable response is
    /// `MissingData`.
    fn load_series(&self, symbol: &str, range: &DateRange) -> Result<SymbolSeries, PipelineError>;
}

/// Normalized bars and reference data held in memory, shareable across workers.
#[derive(Clone)]
pub struct MarketData {
    series: Arc<HashMap<String, SymbolSeries>>,
    symbols: Arc<Vec<String>>,
    unique_dates: Arc<Vec<NaiveDate>>,
    reference: Arc<HashMap<String, ReferenceInfo>>,
}

impl MarketData {
    pub fn from_raw_records(raws: &[RawBar], reference: Vec<ReferenceInfo>) -> Result<Self> {
        let batch = normalize_records(raws);
        if batch.dropped_rows > 0 {
            warn!(
                "Dropped {} of {} raw rows that failed normalization",
                batch.dropped_rows,
                raws.len()
            );
        }
        Self::from_components(batch.series, reference)
    }

    /// Rebuilds from bars that were already normalized (e.g. a snapshot).
    pub fn from_bars(bars: Vec<Bar>, reference: Vec<ReferenceInfo>) -> Result<Self> {
        let (series, duplicates) = build_series(bars);
        if duplicates > 0 {
            warn!("Dropped {} duplicate-date bars", duplicates);
        }
        Self::from_components(series, reference)
    }

    fn from_components(
        series: HashMap<String, SymbolSeries>,
        reference: Vec<ReferenceInfo>,
    ) -> Result<Self> {
        if series.is_empty() {
            return Err(anyhow!("Market data has no usable bars"));
        }

        let mut symbols: Vec<String> = series.keys().cloned().collect();
        symbols.sort();

        let unique_dates: BTreeSet<NaiveDate> = series
            .values()
            .flat_map(|s| s.bars.iter().map(|bar| bar.date))
            .collect();

        let reference = index_reference(reference);

        info!(
            "Loaded {} bars for {} symbols across {} unique dates ({} reference rows)",
            series.values().map(SymbolSeries::len).sum::<usize>(),
            symbols.len(),
            unique_dates.len(),
            reference.len()
        );

        Ok(Self {
            series: Arc::new(series),
            symbols: Arc::new(symbols),
            unique_dates: Arc::new(unique_dates.into_iter().collect()),
            reference: Arc::new(reference),
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!(
            "Loading market data snapshot from {}",
            path.display()
        ));
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Snapshot {} generated at {}",
            path.display(),
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        status.set_phase("Reconstructing market data snapshot");
        Self::from_bars(snapshot.bars, snapshot.reference)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);

        let mut reference: Vec<ReferenceInfo> = self.reference.values().cloned().collect();
        reference.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            bars: self
                .symbols
                .iter()
                .filter_map(|symbol| self.series.get(symbol))
                .flat_map(|series| series.bars.iter().cloned())
                .collect(),
            reference,
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn symbols(&self) -> &[String] {
        self.symbols.as_slice()
    }

    pub fn unique_dates(&self) -> &[NaiveDate] {
        self.unique_dates.as_slice()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.unique_dates.last().copied()
    }

    pub fn series(&self, symbol: &str) -> Option<&SymbolSeries> {
        self.series.get(symbol)
    }

    pub fn reference(&self) -> &HashMap<String, ReferenceInfo> {
        self.reference.as_ref()
    }

    pub fn has_reference(&self) -> bool {
        !self.reference.is_empty()
    }

    /// All series in symbol order.
    pub fn all_series(&self) -> Vec<SymbolSeries> {
        self.symbols
            .iter()
            .filter_map(|symbol| self.series.get(symbol).cloned())
            .collect()
    }

    /// Every series cut down to the given dates, as the daily batch sees them.
    /// Symbols left without bars are dropped.
    pub fn screening_view(&self, dates: &[NaiveDate]) -> Vec<SymbolSeries> {
        let allowed: HashSet<NaiveDate> = dates.iter().copied().collect();
        self.symbols
            .iter()
            .filter_map(|symbol| self.series.get(symbol))
            .map(|series| series.filtered(|bar| allowed.contains(&bar.date)))
            .filter(|series| !series.is_empty())
            .collect()
    }

    pub fn restrict_to_symbols(self, allowed: &HashSet<String>) -> Result<Self> {
        if allowed.is_empty() {
            return Err(anyhow!(
                "Symbol filtering requires at least one allowed symbol"
            ));
        }
        let series: HashMap<String, SymbolSeries> = self
            .series
            .iter()
            .filter(|(symbol, _)| allowed.contains(*symbol))
            .map(|(symbol, series)| (symbol.clone(), series.clone()))
            .collect();
        if series.is_empty() {
            return Err(anyhow!(
                "Market data does not contain any of the requested symbols"
            ));
        }
        let reference = self.reference.values().cloned().collect();
        Self::from_components(series, reference)
    }

    pub fn restrict_to_date_range(self, range: &DateRange) -> Result<Self> {
        if range.is_unbounded() {
            return Ok(self);
        }

        let series: HashMap<String, SymbolSeries> = self
            .series
            .iter()
            .map(|(symbol, series)| {
                (
                    symbol.clone(),
                    series.filtered(|bar| range.contains(bar.date)),
                )
            })
            .filter(|(_, series)| !series.is_empty())
            .collect();

        if series.is_empty() {
            return Err(anyhow!(
                "No bar data remains after restricting to {}",
                range.describe()
            ));
        }
        let reference = self.reference.values().cloned().collect();
        Self::from_components(series, reference)
    }
}

impl BarSource for MarketData {
    fn load_series(&self, symbol: &str, range: &DateRange) -> Result<SymbolSeries, PipelineError> {
        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| PipelineError::MissingData {
                symbol: symbol.to_string(),
                reason: "symbol not present in market data".to_string(),
            })?;
        let selected = if range.is_unbounded() {
            series.clone()
        } else {
            series.filtered(|bar| range.contains(bar.date))
        };
        if selected.is_empty() {
            return Err(PipelineError::MissingData {
                symbol: symbol.to_string(),
                reason: format!("no bars for {}", range.describe()),
            });
        }
        Ok(selected)
    }
}

fn index_reference(rows: Vec<ReferenceInfo>) -> HashMap<String, ReferenceInfo> {
    let mut indexed = HashMap::with_capacity(rows.len());
    for mut row in rows {
        let Some(symbol) = canonical_symbol(&row.symbol) else {
            continue;
        };
        row.symbol = symbol.clone();
        indexed.insert(symbol, row);
    }
    indexed
}

/// Reads one or more daily-bars JSON files into raw records.
pub fn load_raw_records<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RawBar>> {
    let mut records = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open raw bar file {}", path.display()))?;
        let payload: RawBarPayload = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse raw bar file {}", path.display()))?;
        let rows = match payload {
            RawBarPayload::Rows(rows) => rows,
            RawBarPayload::Envelope { data } => data,
        };
        info!("Read {} raw rows from {}", rows.len(), path.display());
        records.extend(rows);
    }
    Ok(records)
}

pub fn load_reference_file<P: AsRef<Path>>(path: P) -> Result<Vec<ReferenceInfo>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open reference file {}", path.display()))?;
    let payload: ReferencePayload = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse reference file {}", path.display()))?;
    Ok(match payload {
        ReferencePayload::Rows(rows) => rows,
        ReferencePayload::Envelope { info } => info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(symbol: &str, date: &str, close: f64) -> RawBar {
        RawBar {
            symbol: Some(symbol.to_string()),
            date: Some(date.to_string()),
            open: Some(json!(close)),
            high: Some(json!(close + 1.0)),
            low: Some(json!(close - 1.0)),
            close: Some(json!(close)),
            ..Default::default()
        }
    }

    fn sample() -> MarketData {
        let raws = vec![
            raw("1301", "2024-01-04", 100.0),
            raw("1301", "2024-01-05", 101.0),
            raw("1301", "2024-01-09", 102.0),
            raw("72030", "2024-01-05", 2500.0),
        ];
        let reference = vec![ReferenceInfo {
            symbol: "7203".to_string(),
            company_name: Some("Toyota".to_string()),
            ..Default::default()
        }];
        MarketData::from_raw_records(&raws, reference).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn indexes_symbols_dates_and_reference() {
        let data = sample();
        assert_eq!(data.symbols(), &["13010".to_string(), "72030".to_string()]);
        assert_eq!(data.unique_dates().len(), 3);
        assert_eq!(data.latest_date(), Some(date(2024, 1, 9)));
        assert!(data.reference().contains_key("72030"));
    }

    #[test]
    fn bar_source_reports_missing_data() {
        let data = sample();
        let range = DateRange::new(Some(date(2024, 1, 5)), None).unwrap();
        let series = data.load_series("13010", &range).unwrap();
        assert_eq!(series.len(), 2);

        let err = data.load_series("99990", &DateRange::default()).unwrap_err();
        assert_eq!(err.kind(), "missing_data");

        let late = DateRange::new(Some(date(2024, 2, 1)), None).unwrap();
        assert!(data.load_series("72030", &late).is_err());
    }

    #[test]
    fn rejects_inverted_ranges() {
        assert!(DateRange::new(Some(date(2024, 2, 1)), Some(date(2024, 1, 1))).is_err());
    }

    #[test]
    fn screening_view_keeps_only_requested_dates() {
        let data = sample();
        let view = data.screening_view(&[date(2024, 1, 5), date(2024, 1, 9)]);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].len(), 2);
        assert_eq!(view[1].len(), 1);

        let restricted = data
            .restrict_to_date_range(&DateRange::new(None, Some(date(2024, 1, 4))).unwrap())
            .unwrap();
        assert_eq!(restricted.symbols(), &["13010".to_string()]);
    }

    #[test]
    fn snapshot_round_trip_preserves_bars_and_reference() {
        let data = sample();
        let dir = std::env::temp_dir().join(format!("dipscreen-snapshot-{}", uuid::Uuid::new_v4()));
        let path = dir.join("market.bin");
        data.save_to_file(&path).unwrap();

        let loaded = MarketData::load_from_file(&path, &RunStatus::new()).unwrap();
        assert_eq!(loaded.symbols(), data.symbols());
        assert_eq!(loaded.series("13010"), data.series("13010"));
        assert_eq!(
            loaded.reference().get("72030").and_then(|r| r.company_name.clone()),
            Some("Toyota".to_string())
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn parses_wrapped_and_bare_payloads() {
        let wrapped: RawBarPayload =
            serde_json::from_str(r#"{"data":[{"Code":"13010","Date":"2024-01-04","C":1}]}"#)
                .unwrap();
        assert!(matches!(wrapped, RawBarPayload::Envelope { ref data } if data.len() == 1));

        let bare: RawBarPayload =
            serde_json::from_str(r#"[{"Code":"13010","Date":"2024-01-04"}]"#).unwrap();
        assert!(matches!(bare, RawBarPayload::Rows(ref rows) if rows.len() == 1));
    }
}
