pub mod backtester;
pub mod calendar;
pub mod commands;
pub mod config;
pub mod context;
pub mod data_context;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod param_utils;
pub mod patterns;
pub mod performance;
pub mod run_status;
pub mod screener;
pub mod trading_rules;
pub mod window_metrics;
