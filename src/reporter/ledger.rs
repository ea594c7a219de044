mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteRunLedger;

/// The last completed run, there is at most one.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub results_location: String,
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// `Ok(None)` before the first run completed.
    async fn get_last_run(&self) -> Result<Option<RunRecord>>;
    async fn update_last_run(&self, timestamp: &DateTime<Utc>, results_location: &str)
        -> Result<()>;
}
