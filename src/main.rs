use anyhow::Result;
use clap::{Parser, Subcommand};
use dipscreen::{
    commands::{backtest, import_bars, screen},
    context::AppContext,
};
use log::info;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "dipscreen")]
#[command(about = "Pullback stock screener and day-stepped backtest engine")]
struct Cli {
    /// Hide progress bars
    #[arg(long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw daily-bar JSON into a market data snapshot
    ImportBars {
        /// Raw daily-bar JSON files (array, or object with a `data` array)
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Listed-company reference JSON (enables the listing-age rule)
        #[arg(long, value_name = "PATH")]
        reference: Option<PathBuf>,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Screen the latest bars for pullback candidates
    Screen {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[command(flatten)]
        args: screen::ScreenArgs,
    },
    /// Replay the entry/exit rules over historical bars
    Backtest {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[command(flatten)]
        args: backtest::BacktestArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { quiet, command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app_context = AppContext::initialize(!quiet);

    info!("Starting dipscreen. Not financial advice. Use at your own risk.");

    match command {
        Commands::ImportBars {
            inputs,
            reference,
            output,
        } => {
            let output_path = resolve_market_data_path(output);
            import_bars::run(&inputs, reference.as_deref(), &output_path)?;
        }
        Commands::Screen { data_file, args } => {
            let market_data_path = resolve_market_data_path(data_file);
            screen::run(&app_context, &args, &market_data_path)?;
        }
        Commands::Backtest { data_file, args } => {
            let market_data_path = resolve_market_data_path(data_file);
            backtest::run(&app_context, &args, &market_data_path)?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
