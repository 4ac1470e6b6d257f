use thiserror::Error;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
    #[error("abi error: {0}")]
    Abi(String),
    #[error("signer error: {0}")]
    Signer(String),
}

impl ChainError {
    /// Whether this error carries an execution-level revert (as opposed to
    /// a transport/serialization problem).
    pub fn is_revert(&self) -> bool {
        matches!(self, ChainError::Rpc { code, .. } if *code == 3 || *code == -32000)
    }
}
