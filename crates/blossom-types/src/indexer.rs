use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Monotonic per-contract indexing cursor, upserted after every successful
/// poll window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerCursor {
    pub chain: String,
    pub network: String,
    pub contract_address: Address,
    pub last_indexed_block: u64,
}
