use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{stream::FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{
    balance::{BalanceKind, BalanceRecord},
    fetcher::{BalanceFetcher, FetchError},
    run::RunContext,
};

const PROGRESS_LOG_EVERY: usize = 50;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("concurrency limit must be at least 1")]
    InvalidConcurrencyLimit,
}

#[derive(Debug, Clone)]
pub struct AddressFetchError {
    pub address: String,
    pub kind: BalanceKind,
    pub error: FetchError,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<BalanceRecord>,
    pub errors: Vec<AddressFetchError>,
}

impl FetchOutcome {
    /// False when no address yielded even a single balance.
    pub fn has_usable_data(&self) -> bool {
        self.records.iter().any(|record| !record.is_total_failure())
    }

    fn push(&mut self, record: BalanceRecord) {
        for kind in [BalanceKind::Native, BalanceKind::Token] {
            if let Some(error) = record.error(kind) {
                self.errors.push(AddressFetchError {
                    address: record.address.clone(),
                    kind,
                    error: error.clone(),
                    observed_at: record.observed_at,
                });
            }
        }
        self.records.push(record);
    }
}

async fn fetch_address<F: BalanceFetcher>(
    fetcher: &F,
    address: String,
    mint: &str,
    cancel: &CancellationToken,
) -> BalanceRecord {
    let (native, token) = tokio::join!(
        fetcher.fetch_native(&address, cancel),
        fetcher.fetch_token(&address, mint, cancel)
    );

    BalanceRecord {
        address,
        native,
        token,
        observed_at: Utc::now(),
    }
}

fn failed_record(address: String, error: FetchError) -> BalanceRecord {
    BalanceRecord {
        address,
        native: Err(error.clone()),
        token: Err(error),
        observed_at: Utc::now(),
    }
}

/// Fetches both balances for every address with at most `concurrency_limit` addresses in
/// flight. Yields exactly one record per input address, in completion order.
pub async fn fetch_all<F: BalanceFetcher + 'static>(
    fetcher: Arc<F>,
    addresses: &[String],
    mint: &str,
    concurrency_limit: usize,
    ctx: &RunContext,
) -> Result<FetchOutcome, SchedulerError> {
    if concurrency_limit == 0 {
        return Err(SchedulerError::InvalidConcurrencyLimit);
    }

    info!(
        "starting to fetch balances for {} addresses with concurrency limit {}",
        addresses.len(),
        concurrency_limit
    );

    let semaphore = Arc::new(Semaphore::new(concurrency_limit));
    let mint: Arc<str> = Arc::from(mint);

    let mut tasks = addresses
        .iter()
        .map(|address| {
            let fetcher = fetcher.clone();
            let semaphore = semaphore.clone();
            let mint = mint.clone();
            let cancel = ctx.cancel_token().clone();
            let task_address = address.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return failed_record(task_address, FetchError::Cancelled);
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(err) => {
                            return failed_record(task_address, FetchError::Aborted(err.to_string()));
                        }
                    },
                };

                fetch_address(fetcher.as_ref(), task_address, &mint, &cancel).await
            });

            let address = address.clone();
            async move { (address, handle.await) }
        })
        .collect::<FuturesUnordered<_>>();

    let mut outcome = FetchOutcome {
        records: Vec::with_capacity(addresses.len()),
        errors: Vec::new(),
    };

    while let Some((address, joined)) = tasks.next().await {
        let record = match joined {
            Ok(record) => record,
            Err(err) => {
                error!(address, %err, "balance fetch task failed");
                failed_record(address, FetchError::Aborted(err.to_string()))
            }
        };
        outcome.push(record);

        let done = outcome.records.len();
        if done % PROGRESS_LOG_EVERY == 0 {
            info!("fetched {}/{} balances", done, addresses.len());
        }
    }

    let native_failed = outcome
        .records
        .iter()
        .filter(|record| record.native.is_err())
        .count();
    let token_failed = outcome
        .records
        .iter()
        .filter(|record| record.token.is_err())
        .count();
    let total = outcome.records.len();

    info!(
        native_succeeded = total - native_failed,
        native_failed,
        token_succeeded = total - token_failed,
        token_failed,
        "completed fetching balances"
    );

    Ok(outcome)
}
