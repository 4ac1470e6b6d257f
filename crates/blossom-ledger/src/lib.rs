//! Durable execution ledger behind a backend-agnostic interface.
//!
//! Two interchangeable implementations: [`SqliteLedger`] over an embedded
//! single-writer file database, and [`PgLedger`] over a networked Postgres
//! with true concurrent writers. Behavior is identical across both; the
//! backend is chosen once at startup and injected as a [`DynLedger`].

mod postgres;
mod schema;
mod sqlite;

pub use postgres::PgLedger;
pub use sqlite::SqliteLedger;

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use blossom_types::{
    Execution, ExecutionStatus, ExecutionStep, IndexerCursor, Intent, Position, PositionKey,
    PositionSide, PositionStatus, Session, StepStatus,
};

pub type LedgerResult<T> = Result<T, LedgerError>;
pub type DynLedger = Arc<dyn LedgerStore>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Pagination envelope: the requested page plus the total matching count.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Filter for list operations. `None` fields match everything.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub chain: Option<String>,
    pub network: Option<String>,
    pub status: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            chain: None,
            network: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Input for creating an intent row. Id, status and timestamps are
/// generated server-side.
#[derive(Debug, Clone, Default)]
pub struct NewIntent {
    pub text: String,
    pub kind: String,
    pub requested_chain: String,
    pub requested_venue: Option<String>,
    pub usd_estimate: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for creating an execution row.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub chain: String,
    pub network: String,
    pub kind: String,
    pub venue: Option<String>,
    pub token_in: Option<Address>,
    pub token_out: Option<Address>,
    pub amount_in: Option<U256>,
    pub amount_out: Option<U256>,
    pub tx_hash: Option<B256>,
    pub status: ExecutionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
    pub latency_ms: Option<u64>,
    pub relayer_address: Option<Address>,
    pub session_id: Option<B256>,
    pub intent_id: Option<String>,
}

/// Input for creating an execution step row.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub execution_id: String,
    pub step_index: u32,
    pub action_type: u8,
    pub adapter: Address,
}

/// Input for creating a position row if absent.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub chain: String,
    pub network: String,
    pub venue: String,
    pub market: String,
    pub side: PositionSide,
    pub leverage: Option<f64>,
    pub margin: U256,
    pub size: U256,
    pub entry_price: U256,
    pub on_chain_position_id: B256,
    pub intent_id: Option<String>,
    pub execution_id: Option<String>,
}

/// Backend-agnostic ledger interface over sessions-cache, intents,
/// executions, execution steps, positions and indexer cursors.
///
/// All creates generate ids and timestamps server-side. All list
/// operations return the page plus the total matching count.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // -- intents ---------------------------------------------------------

    async fn create_intent(&self, new: NewIntent) -> LedgerResult<Intent>;
    async fn get_intent(&self, id: &str) -> LedgerResult<Option<Intent>>;
    /// Persist the mutable fields of an intent (status, stage timestamps,
    /// failure details). The row must already exist.
    async fn update_intent(&self, intent: &Intent) -> LedgerResult<()>;
    async fn list_intents(&self, filter: ListFilter) -> LedgerResult<Page<Intent>>;

    // -- executions ------------------------------------------------------

    async fn create_execution(&self, new: NewExecution) -> LedgerResult<Execution>;
    async fn get_execution(&self, id: &str) -> LedgerResult<Option<Execution>>;
    async fn update_execution(&self, execution: &Execution) -> LedgerResult<()>;
    async fn list_executions(&self, filter: ListFilter) -> LedgerResult<Page<Execution>>;
    async fn executions_for_intent(&self, intent_id: &str) -> LedgerResult<Vec<Execution>>;

    /// Atomically create an execution row and persist the linked intent's
    /// transition in one durable unit. Both shipped backends implement
    /// this as a single database transaction.
    async fn finalize_execution(
        &self,
        new: NewExecution,
        intent: &Intent,
    ) -> LedgerResult<Execution>;

    // -- execution steps -------------------------------------------------

    async fn create_step(&self, new: NewStep) -> LedgerResult<ExecutionStep>;
    async fn update_step(
        &self,
        id: &str,
        status: StepStatus,
        error_message: Option<String>,
    ) -> LedgerResult<()>;
    async fn steps_for_execution(&self, execution_id: &str) -> LedgerResult<Vec<ExecutionStep>>;

    // -- positions -------------------------------------------------------

    /// Create a position keyed by (chain, network, venue,
    /// on_chain_position_id), returning the existing row untouched when
    /// the key is already present.
    async fn create_position_if_absent(&self, new: NewPosition) -> LedgerResult<Position>;
    async fn position_by_key(&self, key: &PositionKey) -> LedgerResult<Option<Position>>;
    /// Transition a position out of `open`. Idempotent: returns `false`
    /// without writing when the row is missing or already non-open.
    async fn close_position(
        &self,
        key: &PositionKey,
        status: PositionStatus,
        closed_at: u64,
    ) -> LedgerResult<bool>;
    async fn list_positions(&self, filter: ListFilter) -> LedgerResult<Page<Position>>;

    // -- session cache (non-authoritative read-through) ------------------

    async fn cache_session(&self, session: &Session, cached_at: u64) -> LedgerResult<()>;
    async fn cached_session(&self, id: B256) -> LedgerResult<Option<Session>>;

    // -- indexer cursor --------------------------------------------------

    async fn indexer_cursor(
        &self,
        chain: &str,
        network: &str,
        contract: Address,
    ) -> LedgerResult<Option<u64>>;
    async fn upsert_indexer_cursor(&self, cursor: &IndexerCursor) -> LedgerResult<()>;
}
