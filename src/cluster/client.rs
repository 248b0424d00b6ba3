//! RPC client side: one handle per remote peer.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::protocol::{
    DeleteRequest, DeleteResponse, ErrorResponse, GetRequest, GetResponse, SetRequest,
    SetResponse, ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_SET,
};

/// Deadline applied to GET and DELETE calls. SET runs under the caller's
/// own deadline, since write payloads can be arbitrarily large.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Handle to one remote peer. Wraps a pooled HTTP connection to the peer's
/// address; dropping the client releases it.
pub struct PeerClient {
    addr: String,
    base_url: String,
    http: reqwest::Client,
    rpc_timeout: Duration,
}

impl PeerClient {
    pub fn new(addr: &str) -> Self {
        Self::with_timeout(addr, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(addr: &str, rpc_timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            base_url: format!("http://{}", addr),
            http: reqwest::Client::new(),
            rpc_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Fetches a value from the peer's copy of `group`.
    pub async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, ENDPOINT_GET))
            .json(&GetRequest {
                group: group.to_string(),
                key: key.to_string(),
            })
            .timeout(self.rpc_timeout)
            .send()
            .await
            .with_context(|| format!("get request to {} failed", self.addr))?;

        let status = response.status();
        if !status.is_success() {
            bail!("peer {} returned {}: {}", self.addr, status, read_error(response).await);
        }
        let body: GetResponse = response.json().await.context("malformed get response")?;
        Ok(body.value)
    }

    /// Pushes a value into the peer's copy of `group`.
    pub async fn set(&self, group: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, ENDPOINT_SET))
            .json(&SetRequest {
                group: group.to_string(),
                key: key.to_string(),
                value,
            })
            .send()
            .await
            .with_context(|| format!("set request to {} failed", self.addr))?;

        let status = response.status();
        if !status.is_success() {
            bail!("peer {} returned {}: {}", self.addr, status, read_error(response).await);
        }
        let _: SetResponse = response.json().await.context("malformed set response")?;
        Ok(())
    }

    /// Removes a value from the peer's copy of `group`; true when applied.
    pub async fn delete(&self, group: &str, key: &str) -> Result<bool> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, ENDPOINT_DELETE))
            .json(&DeleteRequest {
                group: group.to_string(),
                key: key.to_string(),
            })
            .timeout(self.rpc_timeout)
            .send()
            .await
            .with_context(|| format!("delete request to {} failed", self.addr))?;

        let status = response.status();
        if !status.is_success() {
            bail!("peer {} returned {}: {}", self.addr, status, read_error(response).await);
        }
        let body: DeleteResponse = response.json().await.context("malformed delete response")?;
        Ok(body.value)
    }
}

async fn read_error(response: reqwest::Response) -> String {
    match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => "unknown error".to_string(),
    }
}
