use std::{path::PathBuf, sync::LazyLock, time::Duration};

use reqwest::Url;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::env::{
    deserialize_duration_millis, deserialize_duration_minutes, deserialize_duration_seconds,
    get_app_config, mask_str,
};

#[serde_as]
#[derive(Deserialize)]
pub struct AppConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub solana_rpc_url: Url,
    pub token_mint_address: String,
    #[serde(
        default = "default_fetch_interval",
        rename = "fetch_interval_minutes",
        deserialize_with = "deserialize_duration_minutes"
    )]
    pub fetch_interval: Duration,
    #[serde(
        default = "default_rpc_timeout",
        rename = "rpc_timeout_seconds",
        deserialize_with = "deserialize_duration_seconds"
    )]
    pub rpc_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(
        default = "default_retry_base_delay",
        rename = "retry_base_delay_ms",
        deserialize_with = "deserialize_duration_millis"
    )]
    pub retry_base_delay: Duration,
    /// Addresses fetched simultaneously, zero is rejected when a cycle starts.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_addresses_file_path")]
    pub addresses_file_path: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_logs_dir", rename = "logs_dir_path")]
    pub logs_dir: PathBuf,
}

fn default_fetch_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_concurrency_limit() -> usize {
    20
}

fn default_addresses_file_path() -> PathBuf {
    PathBuf::from("addresses.txt")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/balance_reporter.db")
}

fn default_port() -> u16 {
    3000
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl AppConfig {
    pub fn masked_rpc_url(&self) -> String {
        mask_str(self.solana_rpc_url.as_str())
    }
}

pub static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(get_app_config);
