use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use bigdecimal::{num_bigint::BigInt, BigDecimal, Zero};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    balance::BalanceKind,
    rpc::{rpc_request, RpcTransport, TransportError},
};

/// Lamports per SOL, expressed as the decimal scale of a lamport amount.
const LAMPORTS_SCALE: i64 = 9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("non-retriable transport error: {0}")]
    Transport(TransportError),
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },
    #[error("rpc error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
    #[error("fetch cancelled")]
    Cancelled,
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait before `attempt`, counting the first attempt as zero. The first attempt is
    /// never delayed, retry k waits `base_delay * 2^(k-1)`.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }

        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    async fn fetch_native(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BigDecimal, FetchError>;

    async fn fetch_token(
        &self,
        address: &str,
        mint: &str,
        cancel: &CancellationToken,
    ) -> Result<BigDecimal, FetchError>;
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct BalanceResult {
    value: u64,
}

#[derive(Deserialize)]
struct TokenAccountsResult {
    value: Vec<TokenAccount>,
}

#[derive(Deserialize)]
struct TokenAccount {
    account: TokenAccountData,
}

#[derive(Deserialize)]
struct TokenAccountData {
    data: ParsedData,
}

#[derive(Deserialize)]
struct ParsedData {
    parsed: ParsedAccount,
}

#[derive(Deserialize)]
struct ParsedAccount {
    info: ParsedAccountInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedAccountInfo {
    token_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAmount {
    amount: String,
    decimals: u8,
    #[serde(default)]
    ui_amount: Option<serde_json::Number>,
    #[serde(default)]
    ui_amount_string: Option<String>,
}

impl TokenAmount {
    fn ui_balance(&self) -> Option<BigDecimal> {
        self.ui_amount_string
            .as_deref()
            .and_then(|s| BigDecimal::from_str(s).ok())
            .or_else(|| {
                self.ui_amount
                    .as_ref()
                    .and_then(|n| BigDecimal::from_str(&n.to_string()).ok())
            })
    }

    fn raw_balance(&self) -> Result<BigDecimal, FetchError> {
        let raw = BigInt::from_str(&self.amount).map_err(|err| {
            FetchError::InvalidResponse(format!(
                "token amount {:?} is not an integer: {}",
                self.amount, err
            ))
        })?;
        Ok(BigDecimal::new(raw, i64::from(self.decimals)))
    }

    /// The node's own ui amount is preferred. It comes back as zero, or not at all, for some
    /// accounts that do hold a balance, so a zero falls back to the raw amount.
    fn balance(&self) -> Result<BigDecimal, FetchError> {
        match self.ui_balance() {
            Some(ui) if !ui.is_zero() => Ok(ui),
            _ => self.raw_balance(),
        }
    }
}

fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, FetchError> {
    let response: RpcResponse<T> = serde_json::from_slice(body)
        .map_err(|err| FetchError::InvalidResponse(err.to_string()))?;

    if let Some(RpcErrorObject { code, message }) = response.error {
        return Err(FetchError::Protocol { code, message });
    }

    response
        .result
        .ok_or_else(|| FetchError::InvalidResponse("response has neither result nor error".into()))
}

fn native_balance(body: &[u8]) -> Result<BigDecimal, FetchError> {
    let BalanceResult { value } = parse_response(body)?;
    Ok(BigDecimal::new(BigInt::from(value), LAMPORTS_SCALE))
}

fn token_balance(body: &[u8]) -> Result<BigDecimal, FetchError> {
    let TokenAccountsResult { value } = parse_response(body)?;

    // No token account for this mint means the wallet simply holds none.
    match value.into_iter().next() {
        Some(account) => account.account.data.parsed.info.token_amount.balance(),
        None => Ok(BigDecimal::zero()),
    }
}

pub struct SolanaBalanceFetcher<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: RpcTransport> SolanaBalanceFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    async fn call_with_retry(
        &self,
        kind: BalanceKind,
        address: &str,
        request: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;

        loop {
            if let Some(backoff) = self.policy.delay_before(attempt) {
                warn!(
                    %kind,
                    address,
                    attempt,
                    max_retries = self.policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying balance fetch"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.transport.call(request) => result,
            };

            match result {
                Ok(body) => return Ok(body),
                Err(err) if !err.is_retriable() => {
                    debug!(%kind, address, %err, "non-retriable transport error");
                    return Err(FetchError::Transport(err));
                }
                Err(err) if attempt >= self.policy.max_retries => {
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: err,
                    });
                }
                Err(err) => {
                    debug!(%kind, address, attempt, %err, "retriable transport error");
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<T: RpcTransport> BalanceFetcher for SolanaBalanceFetcher<T> {
    async fn fetch_native(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BigDecimal, FetchError> {
        let request = rpc_request("getBalance", json!([address]));
        let body = self
            .call_with_retry(BalanceKind::Native, address, &request, cancel)
            .await?;
        native_balance(&body)
    }

    async fn fetch_token(
        &self,
        address: &str,
        mint: &str,
        cancel: &CancellationToken,
    ) -> Result<BigDecimal, FetchError> {
        let request = rpc_request(
            "getTokenAccountsByOwner",
            json!([address, { "mint": mint }, { "encoding": "jsonParsed" }]),
        );
        let body = self
            .call_with_retry(BalanceKind::Token, address, &request, cancel)
            .await?;
        token_balance(&body)
    }
}
