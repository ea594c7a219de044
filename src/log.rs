use std::path::Path;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "activity";

type FileLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Attaches the log file once its directory is known from config.
pub struct LogFiles {
    handle: reload::Handle<Option<FileLayer>, Registry>,
}

impl LogFiles {
    /// Mirrors every event into a daily `activity.<date>.log` in `dir`. Buffered lines are
    /// flushed when the returned guard is dropped.
    pub fn write_to(&self, dir: &Path) -> Result<WorkerGuard> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
            .with_context(|| format!("failed to open log directory {:?}", dir))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let layer: FileLayer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_ansi(false)
            .with_writer(writer)
            .boxed();
        self.handle
            .reload(Some(layer))
            .context("failed to attach log file")?;

        Ok(guard)
    }
}

fn subscriber(filter: EnvFilter) -> (impl Subscriber + Send + Sync + 'static, LogFiles) {
    let (file_layer, handle) = reload::Layer::new(None::<FileLayer>);

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().json().flatten_event(true))
        .with(filter);

    (subscriber, LogFiles { handle })
}

/// Installs the process-wide JSON subscriber on stdout. Falls back to `info` when `RUST_LOG` is
/// unset.
pub fn init() -> LogFiles {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (subscriber, files) = subscriber(filter);
    subscriber.init();

    files
}
