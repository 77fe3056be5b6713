use crate::data_context::{load_raw_records, load_reference_file, MarketData};
use anyhow::{anyhow, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Normalizes raw daily-bar JSON files (plus optional reference data) into a
/// market data snapshot.
pub fn run(inputs: &[PathBuf], reference_file: Option<&Path>, output_path: &Path) -> Result<()> {
    if inputs.is_empty() {
        return Err(anyhow!("At least one raw bar file is required"));
    }

    info!(
        "Importing {} raw bar file(s) into {}",
        inputs.len(),
        output_path.display()
    );
    let raws = load_raw_records(inputs)?;

    let reference = match reference_file {
        Some(path) => {
            let rows = load_reference_file(path)?;
            info!("Read {} reference rows from {}", rows.len(), path.display());
            rows
        }
        None => {
            info!("No reference file given; listing-age rule will be inactive");
            Vec::new()
        }
    };

    let market_data = MarketData::from_raw_records(&raws, reference)?;
    market_data.save_to_file(output_path)?;
    info!(
        "Market data snapshot successfully written to {} ({} symbols, latest date {})",
        output_path.display(),
        market_data.symbols().len(),
        market_data
            .latest_date()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );

    Ok(())
}
