use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if fs::metadata(path).is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Generate it with `import-bars` before running this command.",
        path.display()
    ))
}
