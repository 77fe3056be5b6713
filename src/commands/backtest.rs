use crate::backtester::{BacktestBatch, SymbolBacktest};
use crate::commands::market_data_snapshot::ensure_market_data_file;
use crate::config::{BacktestConfig, OpenPositionPolicy, BACKTEST_PARAMETER_KEYS};
use crate::context::AppContext;
use crate::data_context::{BarSource, DateRange};
use crate::models::SymbolSkip;
use crate::normalizer::canonical_symbol;
use crate::param_utils::{parse_parameter_assignments, warn_unknown_parameters};
use crate::performance::LedgerStats;
use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    /// Symbols to simulate (comma separated; defaults to every symbol in the snapshot)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
    /// Backtest parameter overrides as key=value (e.g. takeProfitPct=6)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
    /// First bar date to include
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub start: Option<NaiveDate>,
    /// Last bar date to include
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub end: Option<NaiveDate>,
    /// Close a position still open on the last bar instead of discarding it
    #[arg(long = "force-close")]
    pub force_close: bool,
}

#[derive(Debug, Serialize)]
pub struct BacktestOutput {
    pub run_id: Uuid,
    pub range: String,
    pub stats: LedgerStats,
    pub results: Vec<SymbolBacktest>,
    pub skipped: Vec<SymbolSkip>,
}

impl BacktestOutput {
    pub fn from_batch(batch: BacktestBatch, range: &DateRange) -> Self {
        let stats = LedgerStats::from_trades(&batch.all_trades());
        Self {
            run_id: batch.run_id,
            range: range.describe(),
            stats,
            results: batch.results,
            skipped: batch.skipped,
        }
    }
}

pub fn run(app: &AppContext, args: &BacktestArgs, market_data_file: &Path) -> Result<()> {
    ensure_market_data_file(market_data_file)?;
    info!(
        "Using market data snapshot from {}",
        market_data_file.display()
    );

    let parameters = parse_parameter_assignments(&args.params)?;
    warn_unknown_parameters(&parameters, &BACKTEST_PARAMETER_KEYS);
    let mut config = BacktestConfig::from_parameters(&parameters)?;
    if args.force_close {
        config.open_position_policy = OpenPositionPolicy::ForceClose;
    }
    let range = DateRange::new(args.start, args.end)?;

    let context = app.engine_context_from_file(market_data_file, None)?;
    let market_data = context.market_data();
    let symbols: Vec<String> = if args.symbols.is_empty() {
        market_data.symbols().to_vec()
    } else {
        args.symbols
            .iter()
            .filter_map(|symbol| canonical_symbol(symbol))
            .collect()
    };

    info!(
        "Running backtest for {} symbol(s) over {}",
        symbols.len(),
        range.describe()
    );
    let source: Arc<dyn BarSource + Send + Sync> = Arc::new(market_data.clone());
    let batch = context.backtester(config).run(source, &symbols, &range);
    let progress = context.status_handle().snapshot();
    info!(
        "{}: {}/{} symbols completed, {} skipped, {} trades",
        progress.phase,
        progress.completed_symbols,
        progress.total_symbols,
        progress.skipped_symbols,
        progress.trades_so_far
    );
    if !batch.skipped.is_empty() {
        warn!("{} symbol(s) skipped during backtest", batch.skipped.len());
    }

    let output = BacktestOutput::from_batch(batch, &range);
    info!(
        "Backtest {} finished: {} trades, win rate {:.1}%",
        output.run_id,
        output.stats.total_trades,
        output.stats.win_rate * 100.0
    );
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
