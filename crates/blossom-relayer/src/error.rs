use blossom_chain::ChainError;
use blossom_ledger::LedgerError;
use blossom_types::{ErrorKind, PolicyCode};

pub type RelayerResult<T> = Result<T, RelayerError>;

/// Failure taxonomy for the relayer core.
///
/// `Policy` and `Config` are deterministic and carry stable codes.
/// `Submission` and `Timeout` come back from the chain; `Timeout` is
/// indeterminate and must never be folded into `Submission`.
/// `Persistence` is swallowed at the orchestrator boundary so a ledger
/// outage never blocks reporting a real on-chain result.
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("policy violation {}: {message}", code.as_str())]
    Policy { code: PolicyCode, message: String },

    #[error("chain submission failed ({}): {message}", kind.as_str())]
    Submission { kind: ErrorKind, message: String },

    #[error("receipt not observed within the confirmation window")]
    Timeout,

    #[error(transparent)]
    Persistence(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl RelayerError {
    /// Stable code string surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            RelayerError::Policy { code, .. } => code.as_str(),
            RelayerError::Submission { kind, .. } => kind.as_str(),
            RelayerError::Timeout => "CHAIN_TIMEOUT",
            RelayerError::Persistence(_) => "PERSISTENCE_FAILURE",
            RelayerError::Config(_) => "CONFIGURATION_ERROR",
            RelayerError::Chain(_) => "CHAIN_ERROR",
        }
    }
}
