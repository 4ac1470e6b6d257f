use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of an [`Intent`].
///
/// Transitions are monotonic forward; `Failed` is terminal and reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Queued,
    Planned,
    Routed,
    Executing,
    Confirmed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Queued => "queued",
            IntentStatus::Planned => "planned",
            IntentStatus::Routed => "routed",
            IntentStatus::Executing => "executing",
            IntentStatus::Confirmed => "confirmed",
            IntentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(IntentStatus::Queued),
            "planned" => Some(IntentStatus::Planned),
            "routed" => Some(IntentStatus::Routed),
            "executing" => Some(IntentStatus::Executing),
            "confirmed" => Some(IntentStatus::Confirmed),
            "failed" => Some(IntentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Confirmed | IntentStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            IntentStatus::Queued => 0,
            IntentStatus::Planned => 1,
            IntentStatus::Routed => 2,
            IntentStatus::Executing => 3,
            IntentStatus::Confirmed => 4,
            IntentStatus::Failed => 5,
        }
    }

    /// Whether moving `self -> next` is a legal forward transition.
    pub fn can_transition(&self, next: IntentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == IntentStatus::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }
}

/// Pipeline stage at which a failed intent gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Plan,
    Route,
    Execute,
    Confirm,
    Quote,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Plan => "plan",
            FailureStage::Route => "route",
            FailureStage::Execute => "execute",
            FailureStage::Confirm => "confirm",
            FailureStage::Quote => "quote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(FailureStage::Plan),
            "route" => Some(FailureStage::Route),
            "execute" => Some(FailureStage::Execute),
            "confirm" => Some(FailureStage::Confirm),
            "quote" => Some(FailureStage::Quote),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal intent transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: IntentStatus,
    pub to: IntentStatus,
}

/// A user-facing request driven through plan → route → execute → confirm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub text: String,
    /// Parsed request kind (e.g. "swap", "open_position").
    pub kind: String,
    pub requested_chain: String,
    pub requested_venue: Option<String>,
    pub usd_estimate: Option<f64>,
    pub status: IntentStatus,
    pub created_at: u64,
    pub planned_at: Option<u64>,
    pub executed_at: Option<u64>,
    pub confirmed_at: Option<u64>,
    pub failure_stage: Option<FailureStage>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Intent {
    /// Apply a forward transition, stamping `planned_at`/`executed_at`/
    /// `confirmed_at` exactly once.
    pub fn transition(&mut self, next: IntentStatus, now: u64) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        match next {
            IntentStatus::Planned if self.planned_at.is_none() => self.planned_at = Some(now),
            IntentStatus::Executing if self.executed_at.is_none() => self.executed_at = Some(now),
            IntentStatus::Confirmed if self.confirmed_at.is_none() => self.confirmed_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(status: IntentStatus) -> Intent {
        Intent {
            id: "i-1".into(),
            text: "swap 100 USDC for WETH".into(),
            kind: "swap".into(),
            requested_chain: "base".into(),
            requested_venue: None,
            usd_estimate: None,
            status,
            created_at: 0,
            planned_at: None,
            executed_at: None,
            confirmed_at: None,
            failure_stage: None,
            error_code: None,
            error_message: None,
            metadata: None,
        }
    }

    #[test]
    fn forward_transitions_are_single_step() {
        assert!(IntentStatus::Queued.can_transition(IntentStatus::Planned));
        assert!(!IntentStatus::Queued.can_transition(IntentStatus::Routed));
        assert!(IntentStatus::Executing.can_transition(IntentStatus::Confirmed));
    }

    #[test]
    fn failed_reachable_from_any_non_terminal_state() {
        for s in [
            IntentStatus::Queued,
            IntentStatus::Planned,
            IntentStatus::Routed,
            IntentStatus::Executing,
        ] {
            assert!(s.can_transition(IntentStatus::Failed), "{s:?}");
        }
        assert!(!IntentStatus::Confirmed.can_transition(IntentStatus::Failed));
        assert!(!IntentStatus::Failed.can_transition(IntentStatus::Failed));
    }

    #[test]
    fn intents_with_float_estimates_compare_by_value() {
        let mut a = intent(IntentStatus::Queued);
        a.usd_estimate = Some(250.5);
        let b = a.clone();
        assert_eq!(a, b);
        a.usd_estimate = Some(251.0);
        assert_ne!(a, b);
    }

    #[test]
    fn confirmed_at_set_exactly_once() {
        let mut i = intent(IntentStatus::Executing);
        i.transition(IntentStatus::Confirmed, 42).unwrap();
        assert_eq!(i.confirmed_at, Some(42));
        let err = i.transition(IntentStatus::Confirmed, 43).unwrap_err();
        assert_eq!(err.from, IntentStatus::Confirmed);
        assert_eq!(i.confirmed_at, Some(42));
    }
}
