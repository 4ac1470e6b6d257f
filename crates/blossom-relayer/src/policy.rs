//! Session policy evaluation.
//!
//! Pure validation of a proposed plan against the session state and static
//! limits. Checks run in a fixed order and short-circuit on the first
//! failure; nothing here mutates state or touches the chain beyond the
//! injected session lookup. Final enforcement always happens on-chain —
//! in particular the local spend check is advisory only.

use alloy_primitives::Address;
use async_trait::async_trait;

use blossom_chain::{SessionRouter, abi};
use blossom_types::{ActionPlan, DecodedAction, PolicyCode, Session, SessionId, U256};

use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};

/// Largest number of actions one plan may carry.
pub const MAX_ACTIONS: usize = 4;
/// Deadlines further out than this are rejected.
pub const MAX_DEADLINE_WINDOW_SECS: u64 = 600;

/// Static limits the evaluator checks plans against.
#[derive(Debug, Clone)]
pub struct PolicyLimits {
    pub allowed_adapters: Vec<Address>,
    pub allowed_tokens: Vec<Address>,
    pub max_value_per_tx: U256,
    pub max_swap_amount: U256,
}

impl PolicyLimits {
    pub fn from_config(config: &RelayerConfig) -> Self {
        Self {
            allowed_adapters: config.allowed_adapters.clone(),
            allowed_tokens: config.allowed_tokens.clone(),
            max_value_per_tx: config.max_value_per_tx,
            max_swap_amount: config.max_swap_amount,
        }
    }
}

/// Where the evaluator reads session state from. Production wires the
/// router contract; tests inject scripted lookups.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    async fn session(&self, id: SessionId) -> RelayerResult<Option<Session>>;
}

#[async_trait]
impl SessionLookup for SessionRouter {
    async fn session(&self, id: SessionId) -> RelayerResult<Option<Session>> {
        Ok(SessionRouter::session(self, id).await?)
    }
}

fn reject(code: PolicyCode, message: impl Into<String>) -> RelayerError {
    RelayerError::Policy {
        code,
        message: message.into(),
    }
}

/// Validate `plan` for `user` under `session_id`.
///
/// Returns `Ok(())` when the plan may be submitted, `RelayerError::Policy`
/// with a stable code on the first failing check, and `RelayerError::Chain`
/// only if the session lookup itself fails.
pub async fn evaluate(
    session_id: SessionId,
    user: Address,
    plan: &ActionPlan,
    limits: &PolicyLimits,
    lookup: &dyn SessionLookup,
    now: u64,
) -> RelayerResult<()> {
    // 1. action count
    if plan.actions.is_empty() {
        return Err(reject(PolicyCode::EmptyPlan, "plan has no actions"));
    }
    if plan.actions.len() > MAX_ACTIONS {
        return Err(reject(
            PolicyCode::TooManyActions,
            format!("plan has {} actions, limit is {MAX_ACTIONS}", plan.actions.len()),
        ));
    }

    // 2. adapter allowlist
    for action in &plan.actions {
        if !limits.allowed_adapters.contains(&action.adapter) {
            let allowed = limits
                .allowed_adapters
                .iter()
                .map(|a| format!("{a:#x}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(reject(
                PolicyCode::AdapterNotAllowed,
                format!("adapter {:#x} not in allowlist [{allowed}]", action.adapter),
            ));
        }
    }

    // 3. deadline window
    if plan.deadline <= now {
        return Err(reject(
            PolicyCode::DeadlineExpired,
            format!("deadline {} is in the past (now {now})", plan.deadline),
        ));
    }
    if plan.deadline > now + MAX_DEADLINE_WINDOW_SECS {
        return Err(reject(
            PolicyCode::DeadlineTooFar,
            format!(
                "deadline {} exceeds now + {MAX_DEADLINE_WINDOW_SECS}s",
                plan.deadline
            ),
        ));
    }

    // 4. attached native value
    let total_value = plan.total_value();
    if total_value > limits.max_value_per_tx {
        return Err(reject(
            PolicyCode::PolicyExceeded,
            format!(
                "attached value {total_value} exceeds per-tx cap {}",
                limits.max_value_per_tx
            ),
        ));
    }

    // 5. token allowlist and per-swap cap, for calldata we can see through.
    // Opaque actions skip this check rather than failing closed.
    let mut swap_spend = Some(U256::ZERO);
    for action in &plan.actions {
        match abi::decode_swap_action(&action.data) {
            DecodedAction::Swap {
                token_in,
                token_out,
                amount_in,
            } => {
                for token in [token_in, token_out] {
                    if !limits.allowed_tokens.contains(&token) {
                        return Err(reject(
                            PolicyCode::TokenNotAllowed,
                            format!("token {token:#x} not in allowlist"),
                        ));
                    }
                }
                if amount_in > limits.max_swap_amount {
                    return Err(reject(
                        PolicyCode::SwapAmountExceeded,
                        format!(
                            "swap amount {amount_in} exceeds cap {}",
                            limits.max_swap_amount
                        ),
                    ));
                }
                swap_spend = swap_spend.map(|s| s.saturating_add(amount_in));
            }
            DecodedAction::Opaque => {
                // spend is not determinable for this plan
                swap_spend = None;
            }
        }
    }

    // 6. live session
    let session = lookup
        .session(session_id)
        .await?
        .filter(|s| s.owner == user)
        .ok_or_else(|| {
            reject(
                PolicyCode::SessionNotFound,
                format!("session {session_id:#x} not found for user {user:#x}"),
            )
        })?;
    if session.expires_at <= now {
        return Err(reject(
            PolicyCode::SessionExpired,
            format!("session expired at {}", session.expires_at),
        ));
    }
    if !session.active {
        return Err(reject(PolicyCode::SessionRevoked, "session is revoked"));
    }

    // 7. advisory spend check, only when every action decoded to a
    // known-spend shape. On-chain accounting is authoritative; two
    // concurrent plans can both pass here and only one land.
    if let Some(swap_spend) = swap_spend {
        let estimated = swap_spend.saturating_add(total_value);
        if session.spent.saturating_add(estimated) > session.max_spend {
            return Err(reject(
                PolicyCode::PolicyExceeded,
                format!(
                    "estimated spend {estimated} exceeds remaining cap {}",
                    session.remaining_spend()
                ),
            ));
        }
    }

    Ok(())
}
