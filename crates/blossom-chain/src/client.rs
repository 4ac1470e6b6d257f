use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ChainError, ChainResult};
use crate::rpc::{RpcClient, parse_data, parse_quantity};
use crate::signer::{Eip1559Tx, TxSigner};

/// Gas limit used when `eth_estimateGas` is unavailable. High enough for a
/// multi-action plan; the router reverts unused branches anyway.
const FALLBACK_GAS_LIMIT: u64 = 1_500_000;
/// Flat priority fee (1 gwei).
const PRIORITY_FEE_WEI: u64 = 1_000_000_000;

/// One log entry returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

/// Transaction receipt fields the core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Result of a short liveness probe. Never an error: a node that does not
/// answer within the window is unknown, not down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Ok,
    Unhealthy,
    Unknown,
}

/// The RPC surface the core consumes, object-safe so tests can script it.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_call` against a contract, returning raw return data.
    async fn call(&self, to: Address, data: Vec<u8>) -> ChainResult<Vec<u8>>;

    async fn block_number(&self) -> ChainResult<u64>;

    /// `eth_getLogs` for one contract over an inclusive block window.
    async fn get_logs(&self, address: Address, from: u64, to: u64) -> ChainResult<Vec<LogEntry>>;

    /// `eth_getTransactionReceipt`; `None` while the transaction is
    /// unmined.
    async fn get_transaction_receipt(&self, tx_hash: B256) -> ChainResult<Option<TxReceipt>>;

    /// Sign with the relayer key and submit; returns the transaction hash.
    async fn send_transaction(&self, to: Address, data: Vec<u8>, value: U256) -> ChainResult<B256>;

    /// Address the relayer signs with.
    fn relayer_address(&self) -> Address;

    async fn health_check(&self) -> Health;
}

/// Production [`ChainClient`] over a JSON-RPC endpoint.
pub struct HttpChainClient {
    rpc: RpcClient,
    signer: TxSigner,
}

impl HttpChainClient {
    pub fn new(rpc: RpcClient, signer: TxSigner) -> Self {
        Self { rpc, signer }
    }

    async fn nonce(&self) -> ChainResult<u64> {
        let v = self
            .rpc
            .request(
                "eth_getTransactionCount",
                json!([format!("{}", self.signer.address()), "pending"]),
            )
            .await?;
        parse_quantity(&v, "eth_getTransactionCount")
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        let v = self.rpc.request("eth_gasPrice", json!([])).await?;
        let s = v
            .as_str()
            .ok_or_else(|| ChainError::Malformed("eth_gasPrice: expected hex string".into()))?;
        u128::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::Malformed(format!("eth_gasPrice: {e}")))
    }

    async fn estimate_gas(&self, to: Address, data: &[u8], value: U256) -> u64 {
        let params = json!([{
            "from": format!("{}", self.signer.address()),
            "to": format!("{to}"),
            "data": format!("0x{}", hex::encode(data)),
            "value": format!("0x{value:x}"),
        }]);
        match self.rpc.request("eth_estimateGas", params).await {
            // headroom over the node's estimate
            Ok(v) => parse_quantity(&v, "eth_estimateGas")
                .map(|g| g.saturating_mul(12) / 10)
                .unwrap_or(FALLBACK_GAS_LIMIT),
            Err(err) => {
                // estimation failure is not a rejection: the chain is the
                // final arbiter, submit with the fallback limit
                debug!(%err, "gas estimation failed, using fallback limit");
                FALLBACK_GAS_LIMIT
            }
        }
    }
}

fn parse_log(v: &Value) -> ChainResult<LogEntry> {
    let obj = v
        .as_object()
        .ok_or_else(|| ChainError::Malformed("log: expected object".into()))?;
    let address = obj
        .get("address")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Address>().ok())
        .ok_or_else(|| ChainError::Malformed("log: bad address".into()))?;
    let topics = obj
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| ChainError::Malformed("log: missing topics".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .and_then(|s| s.parse::<B256>().ok())
                .ok_or_else(|| ChainError::Malformed("log: bad topic".into()))
        })
        .collect::<ChainResult<Vec<_>>>()?;
    Ok(LogEntry {
        address,
        topics,
        data: parse_data(obj.get("data").unwrap_or(&Value::Null), "log data")?,
        block_number: parse_quantity(
            obj.get("blockNumber").unwrap_or(&Value::Null),
            "log blockNumber",
        )?,
        log_index: parse_quantity(obj.get("logIndex").unwrap_or(&Value::Null), "log logIndex")?,
        tx_hash: obj
            .get("transactionHash")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| ChainError::Malformed("log: bad transactionHash".into()))?,
    })
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn call(&self, to: Address, data: Vec<u8>) -> ChainResult<Vec<u8>> {
        let params = json!([
            { "to": format!("{to}"), "data": format!("0x{}", hex::encode(&data)) },
            "latest",
        ]);
        let v = self.rpc.request("eth_call", params).await?;
        parse_data(&v, "eth_call")
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let v = self.rpc.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&v, "eth_blockNumber")
    }

    async fn get_logs(&self, address: Address, from: u64, to: u64) -> ChainResult<Vec<LogEntry>> {
        let params = json!([{
            "address": format!("{address}"),
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
        }]);
        let v = self.rpc.request("eth_getLogs", params).await?;
        v.as_array()
            .ok_or_else(|| ChainError::Malformed("eth_getLogs: expected array".into()))?
            .iter()
            .map(parse_log)
            .collect()
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> ChainResult<Option<TxReceipt>> {
        let v = self
            .rpc
            .request("eth_getTransactionReceipt", json!([format!("{tx_hash}")]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        let status = parse_quantity(v.get("status").unwrap_or(&Value::Null), "receipt status")?;
        Ok(Some(TxReceipt {
            success: status == 1,
            block_number: parse_quantity(
                v.get("blockNumber").unwrap_or(&Value::Null),
                "receipt blockNumber",
            )?,
            gas_used: parse_quantity(v.get("gasUsed").unwrap_or(&Value::Null), "receipt gasUsed")?,
        }))
    }

    async fn send_transaction(&self, to: Address, data: Vec<u8>, value: U256) -> ChainResult<B256> {
        let nonce = self.nonce().await?;
        let gas_price = self.gas_price().await?;
        let gas_limit = self.estimate_gas(to, &data, value).await;
        let tx = Eip1559Tx {
            nonce,
            max_priority_fee_per_gas: u128::from(PRIORITY_FEE_WEI),
            max_fee_per_gas: gas_price.saturating_mul(2) + u128::from(PRIORITY_FEE_WEI),
            gas_limit,
            to,
            value,
            data,
        };
        let raw = self.signer.sign(&tx)?;
        let v = self
            .rpc
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        v.as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| ChainError::Malformed("eth_sendRawTransaction: bad hash".into()))
    }

    fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    async fn health_check(&self) -> Health {
        match self.rpc.probe().await {
            Some(true) => Health::Ok,
            Some(false) => Health::Unhealthy,
            None => Health::Unknown,
        }
    }
}
