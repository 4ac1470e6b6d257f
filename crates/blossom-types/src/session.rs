use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// On-chain session identifier (`bytes32`).
pub type SessionId = B256;

/// Read-through projection of an on-chain session.
///
/// The contract is the sole writer of `spent` and `active`; the ledger only
/// caches what `sessions(bytes32)` returned. Never treat a cached row as
/// authoritative for spend accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: Address,
    pub executor: Address,
    /// Unix seconds after which the session is unusable.
    pub expires_at: u64,
    pub max_spend: U256,
    pub spent: U256,
    pub allowed_adapters: Vec<Address>,
    pub active: bool,
}

impl Session {
    /// Whether the session can authorize new work at `now` (Unix seconds).
    pub fn is_live(&self, now: u64) -> bool {
        self.active && self.expires_at > now
    }

    /// Spend headroom left under the cap, saturating at zero.
    pub fn remaining_spend(&self) -> U256 {
        self.max_spend.saturating_sub(self.spent)
    }
}
