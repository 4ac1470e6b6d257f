//! Chain client adapter for the Blossom relayer.
//!
//! Wraps the JSON-RPC surface the core needs (`eth_call`, `eth_getLogs`,
//! `eth_blockNumber`, `eth_getTransactionReceipt`, raw transaction
//! submission), the session-router contract ABI, EIP-1559 signing with the
//! relayer-held key, and the receipt confirmation watcher.

pub mod abi;
mod client;
mod error;
pub mod mock;
mod receipt;
mod router;
mod rpc;
mod signer;

pub use client::{ChainClient, Health, HttpChainClient, LogEntry, TxReceipt};
pub use error::{ChainError, ChainResult};
pub use receipt::{ReceiptOutcome, ReceiptWatcher};
pub use router::{
    PositionEvent, SessionRouter, SessionWords, decode_position_event, position_closed_topic,
    position_liquidated_topic, position_opened_topic,
};
pub use rpc::RpcClient;
pub use signer::{Eip1559Tx, TxSigner};
