mod http;

use std::{error::Error as StdError, fmt, io};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

pub use http::HttpTransport;

/// Carries JSON-RPC request bodies to the node and hands back the raw response body. Retrying
/// and decoding are left to the caller.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, request: &Value) -> Result<Vec<u8>, TransportError>;
}

pub fn rpc_request(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    /// Reset, aborted or broken pipe.
    ConnectionReset,
    /// Connection closed before a full response was read.
    UnexpectedEof,
    ConnectionRefused,
    RateLimited,
    Status(StatusCode),
    Other,
}

impl TransportErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => TransportErrorKind::RateLimited,
            status => TransportErrorKind::Status(status),
        }
    }

    fn from_io(err: &io::Error) -> Option<Self> {
        match err.kind() {
            io::ErrorKind::TimedOut => Some(TransportErrorKind::Timeout),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Some(TransportErrorKind::ConnectionReset),
            io::ErrorKind::UnexpectedEof => Some(TransportErrorKind::UnexpectedEof),
            io::ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
            _ => None,
        }
    }

    fn from_hyper(err: &hyper::Error) -> Option<Self> {
        if err.is_timeout() {
            Some(TransportErrorKind::Timeout)
        } else if err.is_incomplete_message() || err.is_closed() {
            Some(TransportErrorKind::UnexpectedEof)
        } else {
            None
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            TransportErrorKind::Timeout
            | TransportErrorKind::ConnectionReset
            | TransportErrorKind::UnexpectedEof
            | TransportErrorKind::ConnectionRefused
            | TransportErrorKind::RateLimited => true,
            TransportErrorKind::Status(status) => matches!(
                *status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            TransportErrorKind::Other => false,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::ConnectionReset => write!(f, "connection reset"),
            TransportErrorKind::UnexpectedEof => write!(f, "unexpected eof"),
            TransportErrorKind::ConnectionRefused => write!(f, "connection refused"),
            TransportErrorKind::RateLimited => write!(f, "rate limited"),
            TransportErrorKind::Status(status) => write!(f, "http status {}", status.as_u16()),
            TransportErrorKind::Other => write!(f, "transport failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// Walks the source chain looking for the first cause we know how to classify. reqwest wraps
/// hyper which in turn wraps the io error, the innermost recognizable cause wins over reqwest's
/// coarse flags except for its own timeout, which has no io cause.
fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    if let Some(status) = err.status() {
        return TransportErrorKind::from_status(status);
    }

    let mut source = err.source();
    let mut from_chain = None;
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if let Some(kind) = TransportErrorKind::from_io(io_err) {
                return kind;
            }
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            from_chain = from_chain.or(TransportErrorKind::from_hyper(hyper_err));
        }
        source = cause.source();
    }

    // Connect errors without a recognizable io cause (dns, tls) are terminal.
    from_chain.unwrap_or(TransportErrorKind::Other)
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = classify_reqwest_error(&err);
        TransportError::new(kind, err.to_string())
    }
}
