use serde::{Deserialize, Serialize};

/// Stable code attached to a policy rejection.
///
/// Policy rejections are deterministic and happen before any chain
/// interaction; these codes surface verbatim to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyCode {
    EmptyPlan,
    TooManyActions,
    AdapterNotAllowed,
    DeadlineExpired,
    DeadlineTooFar,
    PolicyExceeded,
    TokenNotAllowed,
    SwapAmountExceeded,
    SessionNotFound,
    SessionExpired,
    SessionRevoked,
}

impl PolicyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyCode::EmptyPlan => "EMPTY_PLAN",
            PolicyCode::TooManyActions => "TOO_MANY_ACTIONS",
            PolicyCode::AdapterNotAllowed => "ADAPTER_NOT_ALLOWED",
            PolicyCode::DeadlineExpired => "DEADLINE_EXPIRED",
            PolicyCode::DeadlineTooFar => "DEADLINE_TOO_FAR",
            PolicyCode::PolicyExceeded => "POLICY_EXCEEDED",
            PolicyCode::TokenNotAllowed => "TOKEN_NOT_ALLOWED",
            PolicyCode::SwapAmountExceeded => "SWAP_AMOUNT_EXCEEDED",
            PolicyCode::SessionNotFound => "SESSION_NOT_FOUND",
            PolicyCode::SessionExpired => "SESSION_EXPIRED",
            PolicyCode::SessionRevoked => "SESSION_REVOKED",
        }
    }
}

/// Coarse classification of a chain submission failure.
///
/// Derived heuristically from revert-reason/transport messages; unmatched
/// messages land on `Unclassified` rather than being folded into a known
/// kind, so novel failure modes stay visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SessionExpired,
    InsufficientBalance,
    SlippageFailure,
    RelayerFailed,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SessionExpired => "SESSION_EXPIRED",
            ErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorKind::SlippageFailure => "SLIPPAGE_FAILURE",
            ErrorKind::RelayerFailed => "RELAYER_FAILED",
            ErrorKind::Unclassified => "UNCLASSIFIED",
        }
    }
}
