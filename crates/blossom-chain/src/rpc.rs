use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ChainError, ChainResult};

/// Default timeout for ordinary RPC calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
/// Short timeout for liveness probes; a slow node answers "unknown", not
/// "down".
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Thin JSON-RPC client over a single configured endpoint.
pub struct RpcClient {
    url: String,
    client: Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> ChainResult<Self> {
        let client = Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Issue one JSON-RPC request and unwrap the `result` member.
    pub async fn request(&self, method: &str, params: Value) -> ChainResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        debug!(method, "rpc request");
        let resp = self.client.post(&self.url).json(&body).send().await?;
        let v: Value = resp.json().await?;
        if let Some(err) = v.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error")
                .to_string();
            return Err(ChainError::Rpc { code, message });
        }
        v.get("result")
            .cloned()
            .ok_or_else(|| ChainError::Malformed(format!("{method}: missing result")))
    }

    /// Liveness probe with a short timeout. Returns false only on a
    /// definitive failure within the window; a timeout is "unknown" and
    /// handled by the caller.
    pub async fn probe(&self) -> Option<bool> {
        let fut = self.request("eth_blockNumber", json!([]));
        match tokio::time::timeout(HEALTH_TIMEOUT, fut).await {
            Ok(Ok(_)) => Some(true),
            Ok(Err(_)) => Some(false),
            Err(_) => None,
        }
    }
}

/// Parse a `0x`-prefixed quantity into a u64.
pub(crate) fn parse_quantity(v: &Value, what: &str) -> ChainResult<u64> {
    let s = v
        .as_str()
        .ok_or_else(|| ChainError::Malformed(format!("{what}: expected hex string")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Malformed(format!("{what}: {e}")))
}

/// Parse `0x`-prefixed hex data into bytes.
pub(crate) fn parse_data(v: &Value, what: &str) -> ChainResult<Vec<u8>> {
    let s = v
        .as_str()
        .ok_or_else(|| ChainError::Malformed(format!("{what}: expected hex string")))?;
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| ChainError::Malformed(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_parse_from_hex() {
        assert_eq!(parse_quantity(&json!("0x10"), "n").unwrap(), 16);
        assert!(parse_quantity(&json!(16), "n").is_err());
    }

    #[test]
    fn data_parses_from_hex() {
        assert_eq!(parse_data(&json!("0xdead"), "d").unwrap(), vec![0xde, 0xad]);
        assert!(parse_data(&json!("0xzz"), "d").is_err());
    }
}
