use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Status of one attempted on-chain call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Submitted,
    Confirmed,
    Finalized,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Submitted => "submitted",
            ExecutionStatus::Confirmed => "confirmed",
            ExecutionStatus::Finalized => "finalized",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "submitted" => Some(ExecutionStatus::Submitted),
            "confirmed" => Some(ExecutionStatus::Confirmed),
            "finalized" => Some(ExecutionStatus::Finalized),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// One row per attempted on-chain call. Update-only; many executions may
/// belong to one intent (retries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub chain: String,
    pub network: String,
    pub kind: String,
    pub venue: Option<String>,
    pub token_in: Option<Address>,
    pub token_out: Option<Address>,
    pub amount_in: Option<U256>,
    pub amount_out: Option<U256>,
    pub tx_hash: Option<B256>,
    pub status: ExecutionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
    pub latency_ms: Option<u64>,
    pub relayer_address: Option<Address>,
    pub session_id: Option<B256>,
    pub intent_id: Option<String>,
    pub created_at: u64,
}

/// Status of one sub-step of a multi-action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Confirmed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Confirmed => "confirmed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "confirmed" => Some(StepStatus::Confirmed),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

/// Ordered sub-step of a multi-action [`Execution`], tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: String,
    /// Zero-based position within the parent plan.
    pub step_index: u32,
    pub action_type: u8,
    pub adapter: Address,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub created_at: u64,
}
