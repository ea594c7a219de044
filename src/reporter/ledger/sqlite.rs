use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Pool, Sqlite,
};
use tracing::debug;

use super::{RunLedger, RunRecord};

pub struct SqliteRunLedger {
    pool: Pool<Sqlite>,
}

impl SqliteRunLedger {
    /// Opens (creating if needed) the database at `path` and brings its schema up to date.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create database directory {:?}", dir))?;
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await
            .with_context(|| format!("failed to open database {:?}", path))?;

        sqlx::migrate!().run(&pool).await?;

        debug!(?path, "run ledger ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl RunLedger for SqliteRunLedger {
    async fn get_last_run(&self) -> Result<Option<RunRecord>> {
        sqlx::query_as::<_, (DateTime<Utc>, String)>(
            "
            SELECT timestamp, results_location
            FROM last_run
            WHERE id = 1
            ",
        )
        .fetch_optional(&self.pool)
        .await
        .map(|row| {
            row.map(|(timestamp, results_location)| RunRecord {
                timestamp,
                results_location,
            })
        })
        .context("failed to get last run")
    }

    async fn update_last_run(
        &self,
        timestamp: &DateTime<Utc>,
        results_location: &str,
    ) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO last_run (id, timestamp, results_location)
            VALUES (1, ?1, ?2)
            ON CONFLICT (id) DO UPDATE SET
              timestamp = excluded.timestamp,
              results_location = excluded.results_location
            ",
        )
        .bind(timestamp)
        .bind(results_location)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .context("failed to update last run")
    }
}
