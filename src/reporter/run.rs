use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

const RUN_ID_FORMAT: &str = "%Y-%m-%d_%H_%M_%S";

/// Everything a single fetch-compare-report cycle shares between its steps. Dropping the context
/// cancels it, which also stops the deadline timer.
pub struct RunContext {
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl RunContext {
    /// Starts a run that is cancelled when `shutdown` fires or once `deadline` has elapsed,
    /// whichever comes first.
    pub fn new(shutdown: &CancellationToken, deadline: Duration) -> Self {
        let cancel = shutdown.child_token();

        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!(
                        deadline_secs = deadline.as_secs(),
                        "run deadline expired, cancelling outstanding fetches"
                    );
                    timer.cancel();
                }
            }
        });

        Self {
            started_at: Utc::now(),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Timestamp based identifier shared by everything this run writes.
    pub fn run_id(&self) -> String {
        self.started_at.format(RUN_ID_FORMAT).to_string()
    }
}
