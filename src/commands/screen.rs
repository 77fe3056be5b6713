use crate::calendar::screening_dates;
use crate::commands::market_data_snapshot::ensure_market_data_file;
use crate::config::{RuleConfig, RULE_PARAMETER_KEYS};
use crate::context::{AppContext, MarketDataFilters};
use crate::data_context::{DateRange, MarketData};
use crate::error::PipelineError;
use crate::models::SymbolSkip;
use crate::normalizer::canonical_symbol;
use crate::param_utils::{parse_parameter_assignments, warn_unknown_parameters};
use crate::screener::{screen, RankingMode, ScreenOptions};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::Args;
use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;

#[derive(Args, Debug, Clone)]
pub struct ScreenArgs {
    /// Rule parameter overrides as key=value (e.g. minPrice=300)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// Only admit symbols in these sectors
    #[arg(long = "sector", value_name = "SECTOR")]
    pub sectors: Vec<String>,
    /// Replace the default risk-disclosure keywords
    #[arg(long = "risk-keyword", value_name = "KEYWORD")]
    pub risk_keywords: Vec<String>,
    /// Candidate ordering
    #[arg(long, value_enum, default_value_t = RankingMode::DoubleBottomFirst)]
    pub mode: RankingMode,
    /// Maximum number of candidates to report (0 reports all)
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    /// Share of active rules a symbol must pass (1.0 requires all)
    #[arg(long = "min-satisfaction", default_value_t = 1.0)]
    pub min_satisfaction: f64,
    /// Restrict history to the daily batch's fetch dates (30 recent weekdays plus 6m/1y reference days)
    #[arg(long = "batch-dates")]
    pub batch_dates: bool,
    /// Screen as of this date (defaults to the latest date in the snapshot)
    #[arg(long = "as-of", value_name = "YYYY-MM-DD")]
    pub as_of: Option<NaiveDate>,
    /// Limit the universe to these symbols (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

pub fn run(app: &AppContext, args: &ScreenArgs, market_data_file: &Path) -> Result<()> {
    ensure_market_data_file(market_data_file)?;
    info!(
        "Using market data snapshot from {}",
        market_data_file.display()
    );

    let parameters = parse_parameter_assignments(&args.params)?;
    warn_unknown_parameters(&parameters, &RULE_PARAMETER_KEYS);
    let mut config = RuleConfig::from_parameters(&parameters)?.with_sector_filter(args.sectors.clone());
    if !args.risk_keywords.is_empty() {
        config = config.with_risk_keywords(args.risk_keywords.clone());
    }
    config.validate()?;

    if !(0.0..=1.0).contains(&args.min_satisfaction) {
        return Err(anyhow!(
            "--min-satisfaction must be within 0..=1 (got {})",
            args.min_satisfaction
        ));
    }
    let options = ScreenOptions {
        ranking: args.mode,
        min_satisfaction: args.min_satisfaction,
        limit: (args.limit > 0).then_some(args.limit),
    };

    let requested = symbol_filter(&args.symbols);
    let filters = MarketDataFilters {
        range: DateRange::new(None, args.as_of)?,
        symbols: requested.clone(),
    };
    let context = app.engine_context_from_file(market_data_file, Some(filters))?;
    let market_data = context.market_data();

    let as_of = match args.as_of.or_else(|| market_data.latest_date()) {
        Some(date) => date,
        None => return Err(anyhow!("Market data snapshot contains no dates")),
    };

    let universe = if args.batch_dates {
        let dates = screening_dates(as_of);
        info!(
            "Screening on {} batch dates as of {}",
            dates.len(),
            as_of.format("%Y-%m-%d")
        );
        market_data.screening_view(&dates)
    } else {
        market_data.all_series()
    };

    context
        .status_handle()
        .set_phase(format!("Screening {} symbols", universe.len()));
    let mut report = screen(&universe, market_data.reference(), &config, &options);
    if let Some(requested) = &requested {
        report.skipped.extend(missing_symbol_skips(requested, market_data));
        report.skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    }
    context.status_handle().set_phase("Idle");

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Canonical symbol set from the command line, or `None` for the whole universe.
pub fn symbol_filter(raw: &[String]) -> Option<HashSet<String>> {
    let symbols: HashSet<String> = raw.iter().filter_map(|s| canonical_symbol(s)).collect();
    if symbols.is_empty() {
        None
    } else {
        Some(symbols)
    }
}

/// Requested symbols the snapshot has no bars for, as `MissingData` skips.
pub fn missing_symbol_skips(requested: &HashSet<String>, market_data: &MarketData) -> Vec<SymbolSkip> {
    let mut missing: Vec<SymbolSkip> = requested
        .iter()
        .filter(|symbol| market_data.series(symbol).is_none())
        .map(|symbol| {
            let err = PipelineError::MissingData {
                symbol: symbol.clone(),
                reason: "symbol not present in market data".to_string(),
            };
            warn!("Skipping {}", err);
            SymbolSkip {
                symbol: symbol.clone(),
                reason: err.to_string(),
            }
        })
        .collect();
    missing.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;

    #[test]
    fn symbol_filter_canonicalizes_and_ignores_blanks() {
        assert_eq!(symbol_filter(&[]), None);
        assert_eq!(symbol_filter(&["  ".to_string()]), None);

        let filter = symbol_filter(&["7203".to_string(), "13010".to_string()]).unwrap();
        assert!(filter.contains("72030"));
        assert!(filter.contains("13010"));
    }

    #[test]
    fn requested_symbols_absent_from_snapshot_are_reported() {
        let bars: Vec<Bar> = (0..3)
            .map(|day| Bar {
                symbol: "13010".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 2 + day).unwrap(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
            })
            .collect();
        let market_data = MarketData::from_bars(bars, Vec::new()).unwrap();
        let requested = symbol_filter(&["1301".to_string(), "9999".to_string(), "8306".to_string()]).unwrap();

        let skipped = missing_symbol_skips(&requested, &market_data);
        let symbols: Vec<&str> = skipped.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["83060", "99990"]);
        assert!(skipped[0].reason.contains("symbol not present"));
    }
}
