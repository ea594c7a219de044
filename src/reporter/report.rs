mod file;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;

use super::{balance::ComparisonRecord, run::RunContext};

pub use file::CsvReports;

/// Balances an address had according to a stored report, either may be missing when that run
/// failed to fetch it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorBalance {
    pub native: Option<BigDecimal>,
    pub token: Option<BigDecimal>,
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persists the run's comparison and returns where it went. The location is what the run
    /// ledger records for the next cycle.
    async fn write_report(&self, ctx: &RunContext, records: &[ComparisonRecord])
        -> Result<String>;
}

#[async_trait]
pub trait ResultsStore: Send + Sync {
    async fn load_results(&self, location: &str) -> Result<HashMap<String, PriorBalance>>;
}
