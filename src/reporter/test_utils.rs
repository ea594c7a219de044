use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::rpc::{RpcTransport, TransportError, TransportErrorKind};

type Response = Result<Vec<u8>, TransportError>;

#[derive(Default)]
struct Script {
    responses: Vec<Response>,
    served: usize,
    calls: Vec<Instant>,
    /// Accepts the request and never answers.
    hangs: bool,
}

impl Script {
    /// Serves responses in order, then keeps repeating the last one.
    fn next(&mut self) -> Option<Response> {
        let index = self.served.min(self.responses.len().checked_sub(1)?);
        self.served += 1;
        self.responses.get(index).cloned()
    }
}

/// In-memory node keyed by `(method, address)`, the address being the first rpc param.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<(String, String), Script>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, method: &str, address: &str, responses: Vec<Response>) -> Self {
        self.scripts.lock().unwrap().insert(
            (method.to_string(), address.to_string()),
            Script {
                responses,
                ..Script::default()
            },
        );
        self
    }

    pub fn with_hang(self, method: &str, address: &str) -> Self {
        self.scripts.lock().unwrap().insert(
            (method.to_string(), address.to_string()),
            Script {
                hangs: true,
                ..Script::default()
            },
        );
        self
    }

    pub fn call_times(&self, method: &str, address: &str) -> Vec<Instant> {
        self.scripts
            .lock()
            .unwrap()
            .get(&(method.to_string(), address.to_string()))
            .map(|script| script.calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self, method: &str, address: &str) -> usize {
        self.call_times(method, address).len()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(&self, request: &Value) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let method = request["method"].as_str().unwrap_or_default().to_string();
        let address = request["params"][0].as_str().unwrap_or_default().to_string();

        let response = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry((method.clone(), address.clone())).or_default();
            script.calls.push(Instant::now());
            if script.hangs {
                None
            } else {
                Some(script.next())
            }
        };

        match response {
            None => std::future::pending().await,
            Some(response) => response.unwrap_or_else(|| {
                Err(TransportError::new(
                    TransportErrorKind::Other,
                    format!("no script for {} {}", method, address),
                ))
            }),
        }
    }
}

pub fn transport_error(kind: TransportErrorKind) -> TransportError {
    TransportError::new(kind, "scripted failure")
}

fn to_body(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

pub fn native_response(lamports: u64) -> Vec<u8> {
    to_body(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "context": { "slot": 1 }, "value": lamports }
    }))
}

/// `account` is `(amount, decimals, ui_amount_string)`, `None` for a wallet without a token
/// account for the mint.
pub fn token_response(account: Option<(&str, u8, Option<&str>)>) -> Vec<u8> {
    let value = match account {
        Some((amount, decimals, ui_amount_string)) => {
            let ui_amount = ui_amount_string.map(|s| s.parse::<f64>().unwrap());
            json!([{
                "pubkey": "token-account",
                "account": {
                    "data": {
                        "program": "spl-token",
                        "parsed": {
                            "type": "account",
                            "info": {
                                "tokenAmount": {
                                    "amount": amount,
                                    "decimals": decimals,
                                    "uiAmount": ui_amount,
                                    "uiAmountString": ui_amount_string,
                                }
                            }
                        }
                    },
                    "lamports": 2039280
                }
            }])
        }
        None => json!([]),
    };

    to_body(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "context": { "slot": 1 }, "value": value }
    }))
}

pub fn rpc_error_response(code: i64, message: &str) -> Vec<u8> {
    to_body(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}
