mod addresses;
mod balance;
mod comparator;
mod env;
mod fetcher;
mod ledger;
mod report;
mod rpc;
mod run;
mod scheduler;
#[cfg(test)]
mod test_utils;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{ensure, Result};
use axum::{http::StatusCode, routing::get, Router};
use itertools::Itertools;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::log;

use self::{
    addresses::AddressFile,
    balance::ChangeStats,
    comparator::Comparator,
    env::APP_CONFIG,
    fetcher::{BalanceFetcher, RetryPolicy, SolanaBalanceFetcher},
    ledger::{RunLedger, SqliteRunLedger},
    report::{CsvReports, ReportSink, ResultsStore},
    rpc::HttpTransport,
    run::RunContext,
};

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("no balance could be fetched for any of {0} addresses")]
    NoUsableData(usize),
}

/// What a completed cycle produced.
#[derive(Debug)]
pub struct CycleReport {
    pub location: String,
    pub stats: ChangeStats,
}

pub struct Reporter<F, L, R> {
    addresses: AddressFile,
    fetcher: Arc<F>,
    ledger: L,
    reports: R,
    mint: String,
    concurrency_limit: usize,
}

impl<F, L, R> Reporter<F, L, R>
where
    F: BalanceFetcher + 'static,
    L: RunLedger,
    R: ReportSink + ResultsStore,
{
    pub fn new(
        addresses: AddressFile,
        fetcher: F,
        ledger: L,
        reports: R,
        mint: String,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            addresses,
            fetcher: Arc::new(fetcher),
            ledger,
            reports,
            mint,
            concurrency_limit,
        }
    }

    /// Fetch, compare against the previous run, write the report and record it as the last run.
    pub async fn run_cycle(&self, ctx: &RunContext) -> Result<CycleReport> {
        info!(run_id = ctx.run_id(), "starting balance cycle");

        let addresses = self.addresses.read_addresses().await?;

        let outcome = scheduler::fetch_all(
            self.fetcher.clone(),
            &addresses,
            &self.mint,
            self.concurrency_limit,
            ctx,
        )
        .await?;

        if ctx.is_cancelled() {
            warn!("cycle was cancelled, unfinished fetches are recorded as failed");
        }

        for failure in &outcome.errors {
            warn!(
                address = failure.address,
                kind = %failure.kind,
                error = %failure.error,
                observed_at = %failure.observed_at,
                "failed to fetch balance"
            );
        }
        for (kind, count) in outcome.errors.iter().counts_by(|failure| failure.kind) {
            info!(%kind, count, "failed balance fetches");
        }

        if !outcome.has_usable_data() {
            return Err(CycleError::NoUsableData(addresses.len()).into());
        }

        let comparator = Comparator::new(&self.ledger, &self.reports);
        let (records, stats) = comparator.compare(&outcome.records, ctx).await;

        let location = self.reports.write_report(ctx, &records).await?;

        if let Err(err) = self
            .ledger
            .update_last_run(&ctx.started_at, &location)
            .await
        {
            error!(?err, location, "failed to update last run");
        }

        info!(
            total_addresses = stats.total_addresses,
            both_succeeded = stats.both_succeeded,
            native_only = stats.native_only,
            token_only = stats.token_only,
            neither = stats.neither,
            native_changes = stats.native_changes,
            token_changes = stats.token_changes,
            previous_run = stats.previous_run.map(|run| run.to_rfc3339()),
            current_run = %stats.current_run.to_rfc3339(),
            location,
            "completed balance cycle"
        );

        Ok(CycleReport { location, stats })
    }

    /// Runs a cycle right away and then once per `period` until `shutdown` fires. Each cycle gets
    /// `period` as its deadline so cycles never overlap.
    pub async fn run_every(&self, period: Duration, shutdown: &CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let ctx = RunContext::new(shutdown, period);
            match self.run_cycle(&ctx).await {
                Ok(report) => info!(
                    location = report.location,
                    native_changes = report.stats.native_changes,
                    token_changes = report.stats.token_changes,
                    "next cycle compares against this report"
                ),
                Err(err) => match err.downcast_ref::<CycleError>() {
                    Some(CycleError::NoUsableData(_)) => {
                        warn!(%err, "skipping report for this cycle")
                    }
                    None => error!(?err, "balance cycle failed"),
                },
            }
        }
    }
}

async fn mount_health_route(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new().route("/", get(|| async { StatusCode::OK }));

    info!("listening on {}", addr);

    if let Err(err) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
    {
        error!(?err, "health route stopped");
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                warn!(?err, "failed to listen for SIGTERM, only ctrl-c stops the reporter");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

pub async fn start_reporter() -> Result<()> {
    let log_files = log::init();
    let _log_guard = log_files.write_to(&APP_CONFIG.logs_dir)?;

    info!(
        rpc_url = APP_CONFIG.masked_rpc_url(),
        mint = APP_CONFIG.token_mint_address,
        fetch_interval_minutes = APP_CONFIG.fetch_interval.as_secs() / 60,
        concurrency_limit = APP_CONFIG.concurrency_limit,
        max_retries = APP_CONFIG.max_retries,
        "starting balance reporter"
    );

    ensure!(
        !APP_CONFIG.fetch_interval.is_zero(),
        "FETCH_INTERVAL_MINUTES must be at least 1"
    );

    let ledger = SqliteRunLedger::connect(&APP_CONFIG.database_path).await?;
    let reports = CsvReports::new(&APP_CONFIG.reports_dir).await?;
    let transport =
        HttpTransport::new(APP_CONFIG.solana_rpc_url.clone(), APP_CONFIG.rpc_timeout)?;
    let fetcher = SolanaBalanceFetcher::new(
        transport,
        RetryPolicy {
            max_retries: APP_CONFIG.max_retries,
            base_delay: APP_CONFIG.retry_base_delay,
        },
    );

    let reporter = Reporter::new(
        AddressFile::new(&APP_CONFIG.addresses_file_path),
        fetcher,
        ledger,
        reports,
        APP_CONFIG.token_mint_address.clone(),
        APP_CONFIG.concurrency_limit,
    );

    tokio::spawn(mount_health_route(APP_CONFIG.port));

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    reporter.run_every(APP_CONFIG.fetch_interval, &shutdown).await;

    info!("balance reporter stopped");

    Ok(())
}
