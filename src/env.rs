use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use tracing::error;

pub fn deserialize_duration_minutes<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let minutes: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_secs(minutes * 60))
}

pub fn deserialize_duration_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_secs(seconds))
}

pub fn deserialize_duration_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// Keeps the first ten characters of a secret-bearing value, e.g. an RPC url with an api key.
pub fn mask_str(input: &str) -> String {
    match input.char_indices().nth(10) {
        Some((cutoff, _)) => format!("{}***", &input[..cutoff]),
        None => "***".to_string(),
    }
}

pub fn get_app_config<T: DeserializeOwned>() -> T {
    match envy::from_env::<T>() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to parse config: {}", err);
            std::process::exit(1);
        }
    }
}
