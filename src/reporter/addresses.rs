use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

pub struct AddressFile {
    path: PathBuf,
}

fn parse_addresses(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl AddressFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// One address per line, blank lines and `#` comments are skipped. Order and duplicates are
    /// kept as they are in the file.
    pub async fn read_addresses(&self) -> Result<Vec<String>> {
        info!("reading addresses from {}", self.path.display());

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to open addresses file {}", self.path.display()))?;

        let addresses = parse_addresses(&text);
        info!("loaded {} addresses", addresses.len());

        Ok(addresses)
    }
}
