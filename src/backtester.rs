use crate::config::{BacktestConfig, OpenPositionPolicy};
use crate::data_context::{BarSource, DateRange};
use crate::error::PipelineError;
use crate::models::{round_to_tenth, Bar, ExitReason, Position, SymbolSeries, SymbolSkip, Trade};
use crate::run_status::RunStatus;
use crate::trading_rules::{
    close_stop_exit_price, limit_entry_price, price_above, price_below, stop_loss_exit_price,
    take_profit_exit_price,
};
use crate::window_metrics::{push_target, ratio_or_zero, window_extrema, WINDOW_BARS};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    Flat,
    Holding(Position),
}

/// Tries to open a position at `bars[index]` from the 14 bars before it.
fn entry_signal(bars: &[Bar], index: usize, config: &BacktestConfig) -> Option<Position> {
    let window = &bars[index.checked_sub(WINDOW_BARS)?..index];
    let extrema = window_extrema(window)?;
    let breakout_ratio = ratio_or_zero(extrema.high, extrema.low);
    if breakout_ratio < config.window_breakout_min || breakout_ratio > config.window_breakout_max {
        return None;
    }
    if extrema.bars_since_high(window.len()) > config.buy_limit_days {
        return None;
    }

    let bar = &bars[index];
    let target = push_target(extrema.high, extrema.low, config.push_pct);
    let entry_price = limit_entry_price(bar, target)?;
    Some(Position {
        entry_index: index,
        entry_date: bar.date,
        entry_price,
        reference_high: extrema.high,
    })
}

/// Exit checks in pessimistic order; the first that fires wins.
fn exit_signal(
    position: &Position,
    bar: &Bar,
    index: usize,
    config: &BacktestConfig,
) -> Option<(f64, ExitReason)> {
    let entry = position.entry_price;
    if let Some(price) = stop_loss_exit_price(bar, price_below(entry, config.stop_intraday_pct)) {
        return Some((price, ExitReason::IntradayStop));
    }
    if let Some(price) = take_profit_exit_price(bar, price_above(entry, config.take_profit_pct)) {
        return Some((price, ExitReason::TakeProfit));
    }
    if let Some(price) = close_stop_exit_price(bar, price_below(entry, config.stop_close_pct)) {
        return Some((price, ExitReason::CloseStop));
    }
    if index - position.entry_index >= config.sell_limit_days {
        return Some((bar.close, ExitReason::TimeLimit));
    }
    None
}

fn close_position(
    symbol: &str,
    position: &Position,
    bar: &Bar,
    index: usize,
    exit_price: f64,
    exit_reason: ExitReason,
    lot_size: f64,
) -> Trade {
    let entry_price = round_to_tenth(position.entry_price);
    let exit_price = round_to_tenth(exit_price);
    Trade {
        symbol: symbol.to_string(),
        entry_date: position.entry_date,
        exit_date: bar.date,
        holding_days: index - position.entry_index,
        entry_price,
        exit_price,
        pct_return: ratio_or_zero(exit_price, entry_price) - 1.0,
        notional_return: (exit_price - entry_price) * lot_size,
        exit_reason,
    }
}

/// Replays the entry/exit rules over one symbol's bars and returns its trade
/// ledger. Deterministic for a given series and config.
pub fn simulate_symbol(
    series: &SymbolSeries,
    config: &BacktestConfig,
) -> Result<Vec<Trade>, PipelineError> {
    if series.len() < WINDOW_BARS {
        return Err(PipelineError::InsufficientHistory {
            symbol: series.symbol.clone(),
            required: WINDOW_BARS,
            available: series.len(),
        });
    }

    let bars = &series.bars;
    let mut trades = Vec::new();
    let mut state = PositionState::Flat;

    for index in WINDOW_BARS..bars.len() {
        let bar = &bars[index];
        state = match state {
            PositionState::Holding(position) => {
                match exit_signal(&position, bar, index, config) {
                    Some((exit_price, reason)) => {
                        trades.push(close_position(
                            &series.symbol,
                            &position,
                            bar,
                            index,
                            exit_price,
                            reason,
                            config.lot_size,
                        ));
                        PositionState::Flat
                    }
                    None => PositionState::Holding(position),
                }
            }
            PositionState::Flat => match entry_signal(bars, index, config) {
                Some(position) => PositionState::Holding(position),
                None => PositionState::Flat,
            },
        };
    }

    if let PositionState::Holding(position) = state {
        match config.open_position_policy {
            OpenPositionPolicy::Discard => {
                debug!(
                    "{}: discarding position opened {} at series end",
                    series.symbol, position.entry_date
                );
            }
            OpenPositionPolicy::ForceClose => {
                let last_index = bars.len() - 1;
                let last = &bars[last_index];
                if last_index > position.entry_index {
                    trades.push(close_position(
                        &series.symbol,
                        &position,
                        last,
                        last_index,
                        last.close,
                        ExitReason::EndOfData,
                        config.lot_size,
                    ));
                }
            }
        }
    }

    Ok(trades)
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolBacktest {
    pub symbol: String,
    pub bars: usize,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestBatch {
    pub run_id: Uuid,
    pub results: Vec<SymbolBacktest>,
    pub skipped: Vec<SymbolSkip>,
}

impl BacktestBatch {
    pub fn all_trades(&self) -> Vec<Trade> {
        self.results
            .iter()
            .flat_map(|result| result.trades.iter().cloned())
            .collect()
    }
}

struct SymbolTask {
    symbol: String,
}

struct SymbolTaskResult {
    symbol: String,
    outcome: Result<SymbolBacktest, PipelineError>,
}

/// Fans symbol simulations out over a worker pool fed from a bar source.
pub struct BatchBacktester {
    config: BacktestConfig,
    status: RunStatus,
    show_progress: bool,
}

impl BatchBacktester {
    pub fn new(config: BacktestConfig, status: RunStatus) -> Self {
        Self {
            config,
            status,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn run_single_symbol(
        source: &dyn BarSource,
        config: &BacktestConfig,
        symbol: &str,
        range: &DateRange,
    ) -> Result<SymbolBacktest, PipelineError> {
        let series = source.load_series(symbol, range)?;
        let trades = simulate_symbol(&series, config)?;
        Ok(SymbolBacktest {
            symbol: symbol.to_string(),
            bars: series.len(),
            trades,
        })
    }

    pub fn run(
        &self,
        source: Arc<dyn BarSource + Send + Sync>,
        symbols: &[String],
        range: &DateRange,
    ) -> BacktestBatch {
        let run_id = Uuid::new_v4();
        let symbol_count = symbols.len();
        if symbol_count == 0 {
            self.status.set_phase("No symbols to backtest");
            return BacktestBatch {
                run_id,
                results: Vec::new(),
                skipped: Vec::new(),
            };
        }

        info!("Backtest run {} over {} symbols", run_id, symbol_count);
        let num_workers = std::cmp::min(symbol_count, std::cmp::max(1, num_cpus::get()));
        debug!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<SymbolTask>, Receiver<SymbolTask>) = bounded(symbol_count);
        let (result_tx, result_rx): (Sender<SymbolTaskResult>, Receiver<SymbolTaskResult>) =
            bounded(symbol_count);

        let mut handles = Vec::with_capacity(num_workers);
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let source = Arc::clone(&source);
            let config = self.config.clone();
            let range = *range;

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let start_time = Instant::now();
                    let outcome =
                        Self::run_single_symbol(source.as_ref(), &config, &task.symbol, &range);
                    match &outcome {
                        Ok(result) => debug!(
                            "Worker finished {} in {:.0}ms with {} trades",
                            task.symbol,
                            start_time.elapsed().as_secs_f64() * 1000.0,
                            result.trades.len()
                        ),
                        Err(err) => debug!("Worker skipped {}: {}", task.symbol, err),
                    }

                    let message = SymbolTaskResult {
                        symbol: task.symbol,
                        outcome,
                    };
                    if result_tx.send(message).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        for symbol in symbols {
            if tx
                .send(SymbolTask {
                    symbol: symbol.clone(),
                })
                .is_err()
            {
                warn!("Backtest task queue closed before {} was scheduled", symbol);
                break;
            }
        }
        drop(tx);

        self.status
            .set_phase(format!("Backtesting {} symbols", symbol_count));
        self.status.set_progress(symbol_count, 0, 0, 0);

        let pb = if self.show_progress {
            ProgressBar::new(symbol_count as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut results = Vec::new();
        let mut skipped = Vec::new();
        let mut completed = 0usize;
        let mut trade_count = 0usize;
        let mut reported: HashSet<String> = HashSet::with_capacity(symbol_count);
        while completed < symbol_count {
            match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(message) => {
                    completed += 1;
                    reported.insert(message.symbol.clone());
                    pb.set_position(completed as u64);
                    match message.outcome {
                        Ok(result) => {
                            trade_count += result.trades.len();
                            results.push(result);
                        }
                        Err(err) => {
                            warn!("Skipping {}", err);
                            skipped.push(SymbolSkip {
                                symbol: message.symbol,
                                reason: err.to_string(),
                            });
                        }
                    }
                    self.status
                        .set_progress(symbol_count, completed, skipped.len(), trade_count);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if skipped.is_empty() {
            pb.finish_with_message("Backtesting completed");
        } else {
            pb.finish_with_message("Backtesting completed with skipped symbols");
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("A backtest worker panicked");
            }
        }

        for symbol in symbols {
            if reported.insert(symbol.clone()) {
                warn!("No result for {}; its worker failed", symbol);
                skipped.push(SymbolSkip {
                    symbol: symbol.clone(),
                    reason: "worker failed before reporting a result".to_string(),
                });
            }
        }

        results.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        self.status.set_phase("Backtest complete");
        info!(
            "Backtest run {} finished: {} symbols simulated, {} skipped, {} trades",
            run_id,
            results.len(),
            skipped.len(),
            trade_count
        );

        BacktestBatch {
            run_id,
            results,
            skipped,
        }
    }
}
