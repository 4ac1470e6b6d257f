//! Hand-written ABI encoding against the one session-router contract this
//! system talks to. Deliberately not a general ABI machine: only the
//! shapes the router exposes are encoded or decoded here.

use alloy_primitives::{Address, B256, U256, keccak256};

use blossom_types::{ActionPlan, DecodedAction, PlanAction};

use crate::error::{ChainError, ChainResult};

/// `swapExactIn(address tokenIn, address tokenOut, uint256 amountIn,
/// uint256 minAmountOut)` — the one adapter calldata shape the policy
/// evaluator can see through.
pub const SWAP_EXACT_IN_SIG: &str = "swapExactIn(address,address,uint256,uint256)";

pub const EXECUTE_WITH_SESSION_SIG: &str =
    "executeWithSession(bytes32,(address,uint256,uint256,(uint8,address,uint256,bytes)[]))";
pub const SESSIONS_SIG: &str = "sessions(bytes32)";
pub const IS_ADAPTER_ALLOWED_SIG: &str = "isAdapterAllowed(address)";

/// First four bytes of the keccak of a canonical signature.
pub fn selector(sig: &str) -> [u8; 4] {
    let h = keccak256(sig.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

fn word_u256(v: U256) -> [u8; 32] {
    v.to_be_bytes::<32>()
}

fn word_u64(v: u64) -> [u8; 32] {
    word_u256(U256::from(v))
}

fn word_address(a: Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_slice());
    w
}

fn padded_len(n: usize) -> usize {
    n.div_ceil(32) * 32
}

/// ABI encoding of one action tuple `(uint8, address, uint256, bytes)`.
fn encode_action(a: &PlanAction) -> Vec<u8> {
    let mut out = Vec::with_capacity(160 + padded_len(a.data.len()));
    out.extend_from_slice(&word_u64(a.action_type as u64));
    out.extend_from_slice(&word_address(a.adapter));
    out.extend_from_slice(&word_u256(a.value));
    // offset of the bytes tail, relative to the tuple start
    out.extend_from_slice(&word_u64(128));
    out.extend_from_slice(&word_u64(a.data.len() as u64));
    out.extend_from_slice(&a.data);
    out.resize(160 + padded_len(a.data.len()), 0);
    out
}

fn encode_actions(actions: &[PlanAction]) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = actions.iter().map(encode_action).collect();
    let mut out = Vec::new();
    out.extend_from_slice(&word_u64(actions.len() as u64));
    // offsets are relative to the start of the array's data area
    let mut offset = 32 * encoded.len();
    for e in &encoded {
        out.extend_from_slice(&word_u64(offset as u64));
        offset += e.len();
    }
    for e in encoded {
        out.extend_from_slice(&e);
    }
    out
}

/// ABI encoding of the plan tuple
/// `(address user, uint256 nonce, uint256 deadline, Action[] actions)`.
pub fn encode_plan(plan: &ActionPlan) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&word_address(plan.user));
    out.extend_from_slice(&word_u256(plan.nonce));
    out.extend_from_slice(&word_u64(plan.deadline));
    // offset of the actions array, relative to the tuple start
    out.extend_from_slice(&word_u64(128));
    out.extend_from_slice(&encode_actions(&plan.actions));
    out
}

/// Deterministic plan hash: keccak of the ABI plan encoding. Always
/// computed server-side; a client-supplied hash is never trusted.
pub fn plan_hash(plan: &ActionPlan) -> B256 {
    keccak256(encode_plan(plan))
}

/// Calldata for `executeWithSession(bytes32, Plan)`.
pub fn encode_execute_with_session(session_id: B256, plan: &ActionPlan) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&selector(EXECUTE_WITH_SESSION_SIG));
    out.extend_from_slice(session_id.as_slice());
    // the plan tuple is dynamic; its head slot holds the tail offset
    out.extend_from_slice(&word_u64(64));
    out.extend_from_slice(&encode_plan(plan));
    out
}

/// Calldata for the `sessions(bytes32)` getter.
pub fn encode_sessions(session_id: B256) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&selector(SESSIONS_SIG));
    out.extend_from_slice(session_id.as_slice());
    out
}

/// Calldata for `isAdapterAllowed(address)`.
pub fn encode_is_adapter_allowed(adapter: Address) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&selector(IS_ADAPTER_ALLOWED_SIG));
    out.extend_from_slice(&word_address(adapter));
    out
}

/// Fetch the `i`-th 32-byte word of return data.
pub fn read_word(data: &[u8], i: usize) -> ChainResult<[u8; 32]> {
    let start = i * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(ChainError::Abi(format!(
            "return data too short: need word {i}, have {} bytes",
            data.len()
        )));
    }
    let mut w = [0u8; 32];
    w.copy_from_slice(&data[start..end]);
    Ok(w)
}

pub fn decode_address(word: [u8; 32]) -> Address {
    Address::from_slice(&word[12..])
}

pub fn decode_u256(word: [u8; 32]) -> U256 {
    U256::from_be_bytes(word)
}

pub fn decode_u64(word: [u8; 32], what: &str) -> ChainResult<u64> {
    let v = decode_u256(word);
    u64::try_from(v).map_err(|_| ChainError::Abi(format!("{what}: exceeds u64")))
}

pub fn decode_bool(data: &[u8]) -> ChainResult<bool> {
    let w = read_word(data, 0)?;
    Ok(w[31] != 0)
}

/// Try to see through adapter calldata. Only `swapExactIn` decodes; any
/// other selector (or malformed data) is opaque, which the policy layer
/// treats as "skip token checks", not as a failure.
pub fn decode_swap_action(data: &[u8]) -> DecodedAction {
    if data.len() < 4 + 32 * 4 {
        return DecodedAction::Opaque;
    }
    if data[..4] != selector(SWAP_EXACT_IN_SIG) {
        return DecodedAction::Opaque;
    }
    let args = &data[4..];
    let (Ok(w0), Ok(w1), Ok(w2)) = (
        read_word(args, 0),
        read_word(args, 1),
        read_word(args, 2),
    ) else {
        return DecodedAction::Opaque;
    };
    DecodedAction::Swap {
        token_in: decode_address(w0),
        token_out: decode_address(w1),
        amount_in: decode_u256(w2),
    }
}

/// Calldata for a `swapExactIn` adapter call (used by planners and tests).
pub fn encode_swap_action(
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    min_amount_out: U256,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32 * 4);
    out.extend_from_slice(&selector(SWAP_EXACT_IN_SIG));
    out.extend_from_slice(&word_address(token_in));
    out.extend_from_slice(&word_address(token_out));
    out.extend_from_slice(&word_u256(amount_in));
    out.extend_from_slice(&word_u256(min_amount_out));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ActionPlan {
        ActionPlan {
            user: Address::repeat_byte(0xaa),
            nonce: U256::from(1u64),
            deadline: 1_700_000_600,
            actions: vec![PlanAction {
                action_type: 0,
                adapter: Address::repeat_byte(0xbb),
                value: U256::ZERO,
                data: encode_swap_action(
                    Address::repeat_byte(0x01),
                    Address::repeat_byte(0x02),
                    U256::from(100u64),
                    U256::from(99u64),
                ),
            }],
        }
    }

    #[test]
    fn plan_hash_is_deterministic() {
        let a = plan_hash(&sample_plan());
        let b = plan_hash(&sample_plan());
        assert_eq!(a, b);

        let mut other = sample_plan();
        other.nonce = U256::from(2u64);
        assert_ne!(a, plan_hash(&other));
    }

    #[test]
    fn encodings_are_word_aligned() {
        let plan = sample_plan();
        assert_eq!(encode_plan(&plan).len() % 32, 0);
        let call = encode_execute_with_session(B256::repeat_byte(0x05), &plan);
        assert_eq!((call.len() - 4) % 32, 0);
        assert_eq!(&call[..4], &selector(EXECUTE_WITH_SESSION_SIG));
    }

    #[test]
    fn swap_calldata_round_trips() {
        let data = encode_swap_action(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            U256::from(100u64),
            U256::from(95u64),
        );
        match decode_swap_action(&data) {
            DecodedAction::Swap {
                token_in,
                token_out,
                amount_in,
            } => {
                assert_eq!(token_in, Address::repeat_byte(0x01));
                assert_eq!(token_out, Address::repeat_byte(0x02));
                assert_eq!(amount_in, U256::from(100u64));
            }
            DecodedAction::Opaque => panic!("expected decodable swap"),
        }
    }

    #[test]
    fn foreign_selectors_are_opaque() {
        let mut data = encode_swap_action(
            Address::ZERO,
            Address::ZERO,
            U256::from(1u64),
            U256::ZERO,
        );
        data[0] ^= 0xff;
        assert_eq!(decode_swap_action(&data), DecodedAction::Opaque);
        assert_eq!(decode_swap_action(&[0x01, 0x02]), DecodedAction::Opaque);
    }
}
