use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use super::{RpcTransport, TransportError, TransportErrorKind};

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, request: &Value) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                TransportErrorKind::from_status(status),
                format!("rpc node responded with status {}", status),
            ));
        }

        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}
