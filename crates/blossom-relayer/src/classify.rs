//! Heuristic classification of chain submission failures.
//!
//! Revert reasons and transport messages are free text, so this is an
//! ordered substring scan, not a strict contract. Unmatched messages map
//! to [`ErrorKind::Unclassified`] so novel failure modes stay visible
//! instead of being folded into a known kind.

use blossom_types::ErrorKind;

/// First matching needle wins; needles are matched case-insensitively.
const RULES: &[(&str, ErrorKind)] = &[
    ("session expired", ErrorKind::SessionExpired),
    ("session is expired", ErrorKind::SessionExpired),
    ("session not active", ErrorKind::SessionExpired),
    ("insufficient funds", ErrorKind::InsufficientBalance),
    ("insufficient balance", ErrorKind::InsufficientBalance),
    ("transfer amount exceeds balance", ErrorKind::InsufficientBalance),
    ("slippage", ErrorKind::SlippageFailure),
    ("insufficient output amount", ErrorKind::SlippageFailure),
    ("too little received", ErrorKind::SlippageFailure),
    ("price impact", ErrorKind::SlippageFailure),
    ("revert", ErrorKind::RelayerFailed),
    ("spend cap", ErrorKind::RelayerFailed),
    ("nonce too low", ErrorKind::RelayerFailed),
    ("replacement transaction underpriced", ErrorKind::RelayerFailed),
];

pub fn classify(message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    for (needle, kind) in RULES {
        if lowered.contains(needle) {
            return *kind;
        }
    }
    ErrorKind::Unclassified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_revert_reasons_classify() {
        let cases = [
            ("BlossomRouter: session expired", ErrorKind::SessionExpired),
            (
                "err: insufficient funds for gas * price + value",
                ErrorKind::InsufficientBalance,
            ),
            ("UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT", ErrorKind::SlippageFailure),
            ("execution reverted: spend cap exceeded", ErrorKind::RelayerFailed),
            ("execution reverted", ErrorKind::RelayerFailed),
        ];
        for (message, want) in cases {
            assert_eq!(classify(message), want, "{message}");
        }
    }

    #[test]
    fn rule_order_prefers_specific_over_generic() {
        // contains both "revert" and "slippage"; slippage rule comes first
        assert_eq!(
            classify("execution reverted: slippage too high"),
            ErrorKind::SlippageFailure
        );
    }

    #[test]
    fn unmatched_messages_stay_unclassified() {
        assert_eq!(classify("connection reset by peer"), ErrorKind::Unclassified);
        assert_eq!(classify(""), ErrorKind::Unclassified);
    }
}
