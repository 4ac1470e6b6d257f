use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// One adapter call inside an [`ActionPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAction {
    /// Router-level discriminator (swap, lend, proof, ...). Opaque to the
    /// relayer except where the calldata decodes to a known shape.
    pub action_type: u8,
    pub adapter: Address,
    /// Native value attached to this call.
    pub value: U256,
    /// ABI-encoded adapter calldata.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// An ordered list of adapter calls submitted atomically in one transaction.
///
/// Plans are ephemeral: they are never persisted raw, only their
/// keccak hash (computed server-side from the ABI encoding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub user: Address,
    pub nonce: U256,
    /// Unix-second deadline after which the router rejects the plan.
    pub deadline: u64,
    pub actions: Vec<PlanAction>,
}

impl ActionPlan {
    /// Total native value attached across all actions.
    pub fn total_value(&self) -> U256 {
        self.actions
            .iter()
            .fold(U256::ZERO, |acc, a| acc.saturating_add(a.value))
    }
}

/// Result of attempting to decode an action's calldata.
///
/// The policy evaluator pattern-matches over this instead of wrapping a
/// decode attempt in error handling: opaque calldata skips token/amount
/// checks rather than failing closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedAction {
    Swap {
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    },
    Opaque,
}

/// Hex (de)serialization for raw calldata so plans stay readable in JSON.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_value_sums_actions() {
        let plan = ActionPlan {
            user: Address::ZERO,
            nonce: U256::ZERO,
            deadline: 0,
            actions: vec![
                PlanAction {
                    action_type: 0,
                    adapter: Address::ZERO,
                    value: U256::from(3u64),
                    data: vec![],
                },
                PlanAction {
                    action_type: 1,
                    adapter: Address::ZERO,
                    value: U256::from(4u64),
                    data: vec![],
                },
            ],
        };
        assert_eq!(plan.total_value(), U256::from(7u64));
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = ActionPlan {
            user: Address::repeat_byte(0x11),
            nonce: U256::from(7u64),
            deadline: 1_700_000_000,
            actions: vec![PlanAction {
                action_type: 2,
                adapter: Address::repeat_byte(0x22),
                value: U256::ZERO,
                data: vec![0xde, 0xad],
            }],
        };
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("0xdead"));
        let back: ActionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
