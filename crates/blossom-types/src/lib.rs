//! Shared data model for the Blossom relayer: sessions, action plans,
//! intents, executions, positions and indexer cursors, plus the status
//! enums and policy/error codes every other crate consumes.

mod codes;
mod execution;
mod indexer;
mod intent;
mod plan;
mod position;
mod session;

pub use codes::{ErrorKind, PolicyCode};
pub use execution::{Execution, ExecutionStatus, ExecutionStep, StepStatus};
pub use indexer::IndexerCursor;
pub use intent::{FailureStage, Intent, IntentStatus, TransitionError};
pub use plan::{ActionPlan, DecodedAction, PlanAction};
pub use position::{Position, PositionKey, PositionSide, PositionStatus};
pub use session::{Session, SessionId};

pub use alloy_primitives::{Address, B256, U256};

/// Current wall-clock time as Unix seconds.
///
/// All persisted timestamps are generated server-side through this helper;
/// client-supplied timestamps are never trusted for ordering.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
