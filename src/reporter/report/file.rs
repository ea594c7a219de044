use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use tracing::{debug, info, warn};

use super::{PriorBalance, ReportSink, ResultsStore};
use crate::reporter::{
    balance::{format_decimal, BalanceComparison, ComparisonRecord},
    run::RunContext,
};

const MISSING: &str = "N/A";

const HEADER: [&str; 9] = [
    "address",
    "last_solana_balance",
    "current_solana_balance",
    "change_in_solana_balance",
    "is_change_detected_in_solana_balance",
    "last_token_balance",
    "current_token_balance",
    "change_in_token_balance",
    "is_change_detected_in_token_balance",
];

const ADDRESS_COLUMN: &str = "address";
const CURRENT_SOL_COLUMN: &str = "current_solana_balance";
const CURRENT_TOKEN_COLUMN: &str = "current_token_balance";

/// One `balance_<run id>.csv` per run in a single directory.
pub struct CsvReports {
    dir: PathBuf,
}

impl CsvReports {
    pub async fn new(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create reports directory {:?}", dir))?;

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn report_path(&self, ctx: &RunContext) -> PathBuf {
        self.dir.join(format!("balance_{}.csv", ctx.run_id()))
    }
}

fn format_optional(value: &Option<BigDecimal>) -> String {
    value
        .as_ref()
        .map(format_decimal)
        .unwrap_or_else(|| MISSING.to_string())
}

fn comparison_cells(comparison: &BalanceComparison) -> [String; 4] {
    [
        format_optional(&comparison.previous),
        format_optional(&comparison.current),
        format_optional(&comparison.delta),
        comparison.changed.to_string(),
    ]
}

fn encode(records: &[ComparisonRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(HEADER)?;

    for record in records {
        let [last_sol, current_sol, change_sol, changed_sol] = comparison_cells(&record.native);
        let [last_token, current_token, change_token, changed_token] =
            comparison_cells(&record.token);

        writer.write_record(&[
            record.address.clone(),
            last_sol,
            current_sol,
            change_sol,
            changed_sol,
            last_token,
            current_token,
            change_token,
            changed_token,
        ])?;
    }

    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush csv writer: {}", err))
}

fn parse_balance(cell: Option<&str>) -> Option<BigDecimal> {
    match cell.map(str::trim) {
        None | Some(MISSING) | Some("") => None,
        Some(value) => BigDecimal::from_str(value).ok(),
    }
}

/// Reads the current balances back out of a report. Rows are keyed by address, a later row wins
/// over an earlier one for the same address.
fn decode(bytes: &[u8]) -> Result<HashMap<String, PriorBalance>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();

    let column = |name: &str| headers.iter().position(|header| header == name);
    let address_idx = column(ADDRESS_COLUMN).context("address column not found in report")?;
    let sol_idx = column(CURRENT_SOL_COLUMN);
    let token_idx = column(CURRENT_TOKEN_COLUMN);
    if sol_idx.is_none() && token_idx.is_none() {
        return Err(anyhow!(
            "report has neither {} nor {} column",
            CURRENT_SOL_COLUMN,
            CURRENT_TOKEN_COLUMN
        ));
    }

    let mut balances = HashMap::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(%err, "skipping unreadable report row");
                continue;
            }
        };

        let Some(address) = row.get(address_idx).filter(|a| !a.is_empty()) else {
            continue;
        };

        let prior = PriorBalance {
            native: parse_balance(sol_idx.and_then(|idx| row.get(idx))),
            token: parse_balance(token_idx.and_then(|idx| row.get(idx))),
        };
        balances.insert(address.to_string(), prior);
    }

    Ok(balances)
}

#[async_trait]
impl ReportSink for CsvReports {
    async fn write_report(
        &self,
        ctx: &RunContext,
        records: &[ComparisonRecord],
    ) -> Result<String> {
        if records.is_empty() {
            return Err(anyhow!("no balances to write"));
        }

        let path = self.report_path(ctx);
        info!("writing {} balances to {}", records.len(), path.display());

        let bytes = encode(records)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write report {}", path.display()))?;

        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl ResultsStore for CsvReports {
    async fn load_results(&self, location: &str) -> Result<HashMap<String, PriorBalance>> {
        let bytes = tokio::fs::read(location)
            .await
            .with_context(|| format!("failed to read previous report {}", location))?;

        let balances = decode(&bytes)?;
        debug!(location, addresses = balances.len(), "loaded previous report");

        Ok(balances)
    }
}
