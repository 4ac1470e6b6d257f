//! Shared relational layout, mirrored identically across both backends.
//!
//! Bootstrap is idempotent: every table uses `CREATE TABLE IF NOT EXISTS`
//! and column additions go through an "add unless present" step, so
//! re-running against an existing database is a no-op.

use alloy_primitives::{Address, B256, U256};

use crate::{LedgerError, LedgerResult};

/// Base DDL, portable across SQLite and Postgres.
pub(crate) const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sessions_cache (
        session_id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        executor TEXT NOT NULL,
        expires_at BIGINT NOT NULL,
        max_spend TEXT NOT NULL,
        spent TEXT NOT NULL,
        allowed_adapters TEXT NOT NULL,
        active BIGINT NOT NULL,
        cached_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS intents (
        id TEXT PRIMARY KEY,
        intent_text TEXT NOT NULL,
        kind TEXT NOT NULL,
        requested_chain TEXT NOT NULL,
        requested_venue TEXT,
        usd_estimate DOUBLE PRECISION,
        status TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        planned_at BIGINT,
        executed_at BIGINT,
        confirmed_at BIGINT,
        failure_stage TEXT,
        error_code TEXT,
        error_message TEXT,
        metadata_json TEXT
    )",
    "CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        chain TEXT NOT NULL,
        network TEXT NOT NULL,
        kind TEXT NOT NULL,
        venue TEXT,
        token_in TEXT,
        token_out TEXT,
        amount_in TEXT,
        amount_out TEXT,
        tx_hash TEXT,
        status TEXT NOT NULL,
        error_code TEXT,
        error_message TEXT,
        gas_used BIGINT,
        block_number BIGINT,
        relayer_address TEXT,
        session_id TEXT,
        intent_id TEXT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS execution_steps (
        id TEXT PRIMARY KEY,
        execution_id TEXT NOT NULL,
        step_index BIGINT NOT NULL,
        action_type BIGINT NOT NULL,
        adapter TEXT NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS positions (
        id TEXT PRIMARY KEY,
        chain TEXT NOT NULL,
        network TEXT NOT NULL,
        venue TEXT NOT NULL,
        market TEXT NOT NULL,
        side TEXT NOT NULL,
        leverage DOUBLE PRECISION,
        margin TEXT NOT NULL,
        size TEXT NOT NULL,
        entry_price TEXT NOT NULL,
        status TEXT NOT NULL,
        opened_at BIGINT NOT NULL,
        closed_at BIGINT,
        on_chain_position_id TEXT NOT NULL,
        intent_id TEXT,
        execution_id TEXT,
        UNIQUE (chain, network, venue, on_chain_position_id)
    )",
    "CREATE TABLE IF NOT EXISTS indexer_state (
        chain TEXT NOT NULL,
        network TEXT NOT NULL,
        contract_address TEXT NOT NULL,
        last_indexed_block BIGINT NOT NULL,
        PRIMARY KEY (chain, network, contract_address)
    )",
];

/// Columns added after the initial layout shipped. Applied through the
/// backend's idempotent add-column path on every open.
pub(crate) const ADDED_COLUMNS: &[(&str, &str, &str)] =
    &[("executions", "latency_ms", "BIGINT")];

// -- value codecs shared by both backends --------------------------------

pub(crate) fn addr_str(a: Address) -> String {
    format!("{a:#x}")
}

pub(crate) fn parse_addr(s: &str) -> LedgerResult<Address> {
    s.parse::<Address>()
        .map_err(|e| LedgerError::Corrupt(format!("address '{s}': {e}")))
}

pub(crate) fn b256_str(h: B256) -> String {
    format!("{h:#x}")
}

pub(crate) fn parse_b256(s: &str) -> LedgerResult<B256> {
    s.parse::<B256>()
        .map_err(|e| LedgerError::Corrupt(format!("hash '{s}': {e}")))
}

pub(crate) fn u256_str(v: U256) -> String {
    v.to_string()
}

pub(crate) fn parse_u256(s: &str) -> LedgerResult<U256> {
    U256::from_str_radix(s, 10).map_err(|e| LedgerError::Corrupt(format!("amount '{s}': {e}")))
}

pub(crate) fn parse_status<T>(
    parse: impl Fn(&str) -> Option<T>,
    s: &str,
    what: &str,
) -> LedgerResult<T> {
    parse(s).ok_or_else(|| LedgerError::Corrupt(format!("unknown {what} '{s}'")))
}
