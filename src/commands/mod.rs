pub mod backtest;
pub mod import_bars;
pub mod market_data_snapshot;
pub mod screen;
