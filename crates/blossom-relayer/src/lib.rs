//! Blossom relayer core: session policy evaluation, relayed plan
//! execution, intent lifecycle and position indexing over one configured
//! EVM network.
//!
//! The chain surface lives in `blossom-chain`, durable state in
//! `blossom-ledger`; this crate wires them into the orchestration layer
//! callers interact with through [`RelayerContext`].

pub mod classify;
pub mod config;
mod context;
mod error;
pub mod indexer;
pub mod intents;
mod orchestrator;
pub mod policy;

pub use config::{LedgerConfig, RelayerConfig};
pub use context::RelayerContext;
pub use error::{RelayerError, RelayerResult};
pub use indexer::PositionIndexer;
pub use intents::{
    FixedPlanner, IntentController, IntentOptions, IntentOutcome, IntentPlanner, PlannedRoute,
    PlanningError,
};
pub use orchestrator::{
    AttemptRecord, ErrorInfo, ExecutionResult, Orchestrator, ReceiptStatus, SessionSnapshot,
};
pub use policy::{MAX_ACTIONS, PolicyLimits, SessionLookup, evaluate};
