//! Embedded SQLite backend.
//!
//! The file is process-local and single-writer,
//! so calls take a plain mutex and run synchronously; statements are
//! short-lived point reads/writes and never block on the network.

use std::path::Path;
use std::sync::Mutex;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use rusqlite::{Connection, Row, params};
use tracing::debug;
use uuid::Uuid;

use blossom_types::{
    Execution, ExecutionStatus, ExecutionStep, FailureStage, IndexerCursor, Intent, IntentStatus,
    Position, PositionKey, PositionSide, PositionStatus, Session, StepStatus, now_unix,
};

use crate::schema::{
    ADDED_COLUMNS, CREATE_TABLES, addr_str, b256_str, parse_addr, parse_b256, parse_status,
    parse_u256, u256_str,
};
use crate::{
    LedgerError, LedgerResult, LedgerStore, ListFilter, NewExecution, NewIntent, NewPosition,
    NewStep, Page,
};

const INTENT_COLS: &str = "id, intent_text, kind, requested_chain, requested_venue, usd_estimate, \
     status, created_at, planned_at, executed_at, confirmed_at, failure_stage, error_code, \
     error_message, metadata_json";

const EXECUTION_COLS: &str = "id, chain, network, kind, venue, token_in, token_out, amount_in, \
     amount_out, tx_hash, status, error_code, error_message, gas_used, block_number, latency_ms, \
     relayer_address, session_id, intent_id, created_at";

const POSITION_COLS: &str = "id, chain, network, venue, market, side, leverage, margin, size, \
     entry_price, status, opened_at, closed_at, on_chain_position_id, intent_id, execution_id";

const STEP_COLS: &str =
    "id, execution_id, step_index, action_type, adapter, status, error_message, created_at";

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Backend(e.to_string())
}

fn conv_err(e: LedgerError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn bootstrap(conn: &Connection) -> LedgerResult<()> {
        for ddl in CREATE_TABLES {
            conn.execute(ddl, []).map_err(db_err)?;
        }
        for (table, column, ty) in ADDED_COLUMNS {
            let stmt = format!("ALTER TABLE {table} ADD COLUMN {column} {ty}");
            match conn.execute(&stmt, []) {
                Ok(_) => debug!(table, column, "added column"),
                // "already exists" is success, not an error
                Err(e) if e.to_string().contains("duplicate column name") => {}
                Err(e) => return Err(db_err(e)),
            }
        }
        Ok(())
    }
}

// -- row mappers ---------------------------------------------------------

fn map_intent(row: &Row<'_>) -> rusqlite::Result<Intent> {
    let status: String = row.get("status")?;
    let failure_stage: Option<String> = row.get("failure_stage")?;
    let metadata_json: Option<String> = row.get("metadata_json")?;
    Ok(Intent {
        id: row.get("id")?,
        text: row.get("intent_text")?,
        kind: row.get("kind")?,
        requested_chain: row.get("requested_chain")?,
        requested_venue: row.get("requested_venue")?,
        usd_estimate: row.get("usd_estimate")?,
        status: parse_status(IntentStatus::parse, &status, "intent status").map_err(conv_err)?,
        created_at: row.get::<_, i64>("created_at")? as u64,
        planned_at: row.get::<_, Option<i64>>("planned_at")?.map(|v| v as u64),
        executed_at: row.get::<_, Option<i64>>("executed_at")?.map(|v| v as u64),
        confirmed_at: row.get::<_, Option<i64>>("confirmed_at")?.map(|v| v as u64),
        failure_stage: failure_stage
            .map(|s| parse_status(FailureStage::parse, &s, "failure stage").map_err(conv_err))
            .transpose()?,
        error_code: row.get("error_code")?,
        error_message: row.get("error_message")?,
        metadata: metadata_json
            .map(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| conv_err(LedgerError::Corrupt(format!("metadata: {e}"))))
            })
            .transpose()?,
    })
}

fn map_execution(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get("status")?;
    let opt_addr = |v: Option<String>| -> rusqlite::Result<Option<Address>> {
        v.map(|s| parse_addr(&s).map_err(conv_err)).transpose()
    };
    let opt_amount = |v: Option<String>| {
        v.map(|s| parse_u256(&s).map_err(conv_err)).transpose()
    };
    Ok(Execution {
        id: row.get("id")?,
        chain: row.get("chain")?,
        network: row.get("network")?,
        kind: row.get("kind")?,
        venue: row.get("venue")?,
        token_in: opt_addr(row.get("token_in")?)?,
        token_out: opt_addr(row.get("token_out")?)?,
        amount_in: opt_amount(row.get("amount_in")?)?,
        amount_out: opt_amount(row.get("amount_out")?)?,
        tx_hash: row
            .get::<_, Option<String>>("tx_hash")?
            .map(|s| parse_b256(&s).map_err(conv_err))
            .transpose()?,
        status: parse_status(ExecutionStatus::parse, &status, "execution status")
            .map_err(conv_err)?,
        error_code: row.get("error_code")?,
        error_message: row.get("error_message")?,
        gas_used: row.get::<_, Option<i64>>("gas_used")?.map(|v| v as u64),
        block_number: row.get::<_, Option<i64>>("block_number")?.map(|v| v as u64),
        latency_ms: row.get::<_, Option<i64>>("latency_ms")?.map(|v| v as u64),
        relayer_address: opt_addr(row.get("relayer_address")?)?,
        session_id: row
            .get::<_, Option<String>>("session_id")?
            .map(|s| parse_b256(&s).map_err(conv_err))
            .transpose()?,
        intent_id: row.get("intent_id")?,
        created_at: row.get::<_, i64>("created_at")? as u64,
    })
}

fn map_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    let side: String = row.get("side")?;
    let status: String = row.get("status")?;
    let margin: String = row.get("margin")?;
    let size: String = row.get("size")?;
    let entry: String = row.get("entry_price")?;
    let pos_id: String = row.get("on_chain_position_id")?;
    Ok(Position {
        id: row.get("id")?,
        chain: row.get("chain")?,
        network: row.get("network")?,
        venue: row.get("venue")?,
        market: row.get("market")?,
        side: parse_status(PositionSide::parse, &side, "position side").map_err(conv_err)?,
        leverage: row.get("leverage")?,
        margin: parse_u256(&margin).map_err(conv_err)?,
        size: parse_u256(&size).map_err(conv_err)?,
        entry_price: parse_u256(&entry).map_err(conv_err)?,
        status: parse_status(PositionStatus::parse, &status, "position status")
            .map_err(conv_err)?,
        opened_at: row.get::<_, i64>("opened_at")? as u64,
        closed_at: row.get::<_, Option<i64>>("closed_at")?.map(|v| v as u64),
        on_chain_position_id: parse_b256(&pos_id).map_err(conv_err)?,
        intent_id: row.get("intent_id")?,
        execution_id: row.get("execution_id")?,
    })
}

fn map_step(row: &Row<'_>) -> rusqlite::Result<ExecutionStep> {
    let status: String = row.get("status")?;
    let adapter: String = row.get("adapter")?;
    Ok(ExecutionStep {
        id: row.get("id")?,
        execution_id: row.get("execution_id")?,
        step_index: row.get::<_, i64>("step_index")? as u32,
        action_type: row.get::<_, i64>("action_type")? as u8,
        adapter: parse_addr(&adapter).map_err(conv_err)?,
        status: parse_status(StepStatus::parse, &status, "step status").map_err(conv_err)?,
        error_message: row.get("error_message")?,
        created_at: row.get::<_, i64>("created_at")? as u64,
    })
}

// -- filter plumbing -----------------------------------------------------

/// Build a WHERE clause for (chain, network, status) filters. `chain_col`
/// lets the intents table map "chain" onto `requested_chain`.
fn filter_clause(filter: &ListFilter, chain_col: &str, with_network: bool) -> (String, Vec<String>) {
    let mut parts = Vec::new();
    let mut args = Vec::new();
    if let Some(chain) = &filter.chain {
        args.push(chain.clone());
        parts.push(format!("{chain_col} = ?{}", args.len()));
    }
    if with_network {
        if let Some(network) = &filter.network {
            args.push(network.clone());
            parts.push(format!("network = ?{}", args.len()));
        }
    }
    if let Some(status) = &filter.status {
        args.push(status.clone());
        parts.push(format!("status = ?{}", args.len()));
    }
    let clause = if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    };
    (clause, args)
}

fn list_page<T>(
    conn: &Connection,
    table: &str,
    cols: &str,
    chain_col: &str,
    with_network: bool,
    filter: &ListFilter,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> LedgerResult<Page<T>> {
    let (clause, args) = filter_clause(filter, chain_col, with_network);
    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table}{clause}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )
        .map_err(db_err)?;

    let sql = format!(
        "SELECT {cols} FROM {table}{clause} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
        args.len() + 1,
        args.len() + 2
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let mut all_args: Vec<Box<dyn rusqlite::types::ToSql>> = args
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn rusqlite::types::ToSql>)
        .collect();
    all_args.push(Box::new(filter.limit as i64));
    all_args.push(Box::new(filter.offset as i64));
    let items = stmt
        .query_map(rusqlite::params_from_iter(all_args), |row| map(row))
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(Page {
        items,
        total: total as u64,
    })
}

// -- insert/update helpers shared with finalize --------------------------

fn insert_execution(conn: &Connection, new: &NewExecution) -> LedgerResult<Execution> {
    let execution = Execution {
        id: Uuid::new_v4().to_string(),
        chain: new.chain.clone(),
        network: new.network.clone(),
        kind: new.kind.clone(),
        venue: new.venue.clone(),
        token_in: new.token_in,
        token_out: new.token_out,
        amount_in: new.amount_in,
        amount_out: new.amount_out,
        tx_hash: new.tx_hash,
        status: new.status,
        error_code: new.error_code.clone(),
        error_message: new.error_message.clone(),
        gas_used: new.gas_used,
        block_number: new.block_number,
        latency_ms: new.latency_ms,
        relayer_address: new.relayer_address,
        session_id: new.session_id,
        intent_id: new.intent_id.clone(),
        created_at: now_unix(),
    };
    conn.execute(
        "INSERT INTO executions (id, chain, network, kind, venue, token_in, token_out, amount_in, \
         amount_out, tx_hash, status, error_code, error_message, gas_used, block_number, \
         latency_ms, relayer_address, session_id, intent_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            execution.id,
            execution.chain,
            execution.network,
            execution.kind,
            execution.venue,
            execution.token_in.map(addr_str),
            execution.token_out.map(addr_str),
            execution.amount_in.map(u256_str),
            execution.amount_out.map(u256_str),
            execution.tx_hash.map(b256_str),
            execution.status.as_str(),
            execution.error_code,
            execution.error_message,
            execution.gas_used.map(|v| v as i64),
            execution.block_number.map(|v| v as i64),
            execution.latency_ms.map(|v| v as i64),
            execution.relayer_address.map(addr_str),
            execution.session_id.map(b256_str),
            execution.intent_id,
            execution.created_at as i64,
        ],
    )
    .map_err(db_err)?;
    Ok(execution)
}

fn write_intent(conn: &Connection, intent: &Intent) -> LedgerResult<()> {
    let changed = conn
        .execute(
            "UPDATE intents SET status = ?1, planned_at = ?2, executed_at = ?3, confirmed_at = ?4, \
             failure_stage = ?5, error_code = ?6, error_message = ?7, kind = ?8, \
             requested_venue = ?9, usd_estimate = ?10, metadata_json = ?11 WHERE id = ?12",
            params![
                intent.status.as_str(),
                intent.planned_at.map(|v| v as i64),
                intent.executed_at.map(|v| v as i64),
                intent.confirmed_at.map(|v| v as i64),
                intent.failure_stage.map(|s| s.as_str()),
                intent.error_code,
                intent.error_message,
                intent.kind,
                intent.requested_venue,
                intent.usd_estimate,
                intent
                    .metadata
                    .as_ref()
                    .map(|m| serde_json::to_string(m).unwrap_or_default()),
                intent.id,
            ],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(LedgerError::NotFound {
            what: "intent",
            id: intent.id.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn create_intent(&self, new: NewIntent) -> LedgerResult<Intent> {
        let intent = Intent {
            id: Uuid::new_v4().to_string(),
            text: new.text,
            kind: new.kind,
            requested_chain: new.requested_chain,
            requested_venue: new.requested_venue,
            usd_estimate: new.usd_estimate,
            status: IntentStatus::Queued,
            created_at: now_unix(),
            planned_at: None,
            executed_at: None,
            confirmed_at: None,
            failure_stage: None,
            error_code: None,
            error_message: None,
            metadata: new.metadata,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO intents (id, intent_text, kind, requested_chain, requested_venue, \
             usd_estimate, status, created_at, metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                intent.id,
                intent.text,
                intent.kind,
                intent.requested_chain,
                intent.requested_venue,
                intent.usd_estimate,
                intent.status.as_str(),
                intent.created_at as i64,
                intent
                    .metadata
                    .as_ref()
                    .map(|m| serde_json::to_string(m).unwrap_or_default()),
            ],
        )
        .map_err(db_err)?;
        Ok(intent)
    }

    async fn get_intent(&self, id: &str) -> LedgerResult<Option<Intent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT {INTENT_COLS} FROM intents WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![id], map_intent)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows.pop())
    }

    async fn update_intent(&self, intent: &Intent) -> LedgerResult<()> {
        let conn = self.conn.lock().unwrap();
        write_intent(&conn, intent)
    }

    async fn list_intents(&self, filter: ListFilter) -> LedgerResult<Page<Intent>> {
        let conn = self.conn.lock().unwrap();
        list_page(
            &conn,
            "intents",
            INTENT_COLS,
            "requested_chain",
            false,
            &filter,
            map_intent,
        )
    }

    async fn create_execution(&self, new: NewExecution) -> LedgerResult<Execution> {
        let conn = self.conn.lock().unwrap();
        insert_execution(&conn, &new)
    }

    async fn get_execution(&self, id: &str) -> LedgerResult<Option<Execution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXECUTION_COLS} FROM executions WHERE id = ?1"
            ))
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![id], map_execution)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows.pop())
    }

    async fn update_execution(&self, execution: &Execution) -> LedgerResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE executions SET status = ?1, tx_hash = ?2, error_code = ?3, \
                 error_message = ?4, gas_used = ?5, block_number = ?6, latency_ms = ?7, \
                 amount_out = ?8 WHERE id = ?9",
                params![
                    execution.status.as_str(),
                    execution.tx_hash.map(b256_str),
                    execution.error_code,
                    execution.error_message,
                    execution.gas_used.map(|v| v as i64),
                    execution.block_number.map(|v| v as i64),
                    execution.latency_ms.map(|v| v as i64),
                    execution.amount_out.map(u256_str),
                    execution.id,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LedgerError::NotFound {
                what: "execution",
                id: execution.id.clone(),
            });
        }
        Ok(())
    }

    async fn list_executions(&self, filter: ListFilter) -> LedgerResult<Page<Execution>> {
        let conn = self.conn.lock().unwrap();
        list_page(
            &conn,
            "executions",
            EXECUTION_COLS,
            "chain",
            true,
            &filter,
            map_execution,
        )
    }

    async fn executions_for_intent(&self, intent_id: &str) -> LedgerResult<Vec<Execution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXECUTION_COLS} FROM executions WHERE intent_id = ?1 ORDER BY created_at, id"
            ))
            .map_err(db_err)?;
        stmt.query_map(params![intent_id], map_execution)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn finalize_execution(
        &self,
        new: NewExecution,
        intent: &Intent,
    ) -> LedgerResult<Execution> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let execution = insert_execution(&tx, &new)?;
        write_intent(&tx, intent)?;
        tx.commit().map_err(db_err)?;
        Ok(execution)
    }

    async fn create_step(&self, new: NewStep) -> LedgerResult<ExecutionStep> {
        let step = ExecutionStep {
            id: Uuid::new_v4().to_string(),
            execution_id: new.execution_id,
            step_index: new.step_index,
            action_type: new.action_type,
            adapter: new.adapter,
            status: StepStatus::Pending,
            error_message: None,
            created_at: now_unix(),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO execution_steps (id, execution_id, step_index, action_type, adapter, \
             status, error_message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                step.id,
                step.execution_id,
                step.step_index as i64,
                step.action_type as i64,
                addr_str(step.adapter),
                step.status.as_str(),
                step.error_message,
                step.created_at as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(step)
    }

    async fn update_step(
        &self,
        id: &str,
        status: StepStatus,
        error_message: Option<String>,
    ) -> LedgerResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE execution_steps SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![status.as_str(), error_message, id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LedgerError::NotFound {
                what: "execution step",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn steps_for_execution(&self, execution_id: &str) -> LedgerResult<Vec<ExecutionStep>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STEP_COLS} FROM execution_steps WHERE execution_id = ?1 ORDER BY step_index"
            ))
            .map_err(db_err)?;
        stmt.query_map(params![execution_id], map_step)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn create_position_if_absent(&self, new: NewPosition) -> LedgerResult<Position> {
        let key = PositionKey {
            chain: new.chain.clone(),
            network: new.network.clone(),
            venue: new.venue.clone(),
            on_chain_position_id: new.on_chain_position_id,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO positions (id, chain, network, venue, market, side, leverage, \
             margin, size, entry_price, status, opened_at, closed_at, on_chain_position_id, \
             intent_id, execution_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                Uuid::new_v4().to_string(),
                new.chain,
                new.network,
                new.venue,
                new.market,
                new.side.as_str(),
                new.leverage,
                u256_str(new.margin),
                u256_str(new.size),
                u256_str(new.entry_price),
                PositionStatus::Open.as_str(),
                now_unix() as i64,
                Option::<i64>::None,
                b256_str(new.on_chain_position_id),
                new.intent_id,
                new.execution_id,
            ],
        )
        .map_err(db_err)?;
        position_by_key_sync(&conn, &key)?.ok_or(LedgerError::NotFound {
            what: "position",
            id: b256_str(key.on_chain_position_id),
        })
    }

    async fn position_by_key(&self, key: &PositionKey) -> LedgerResult<Option<Position>> {
        let conn = self.conn.lock().unwrap();
        position_by_key_sync(&conn, key)
    }

    async fn close_position(
        &self,
        key: &PositionKey,
        status: PositionStatus,
        closed_at: u64,
    ) -> LedgerResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE positions SET status = ?1, closed_at = ?2 \
                 WHERE chain = ?3 AND network = ?4 AND venue = ?5 \
                 AND on_chain_position_id = ?6 AND status = 'open'",
                params![
                    status.as_str(),
                    closed_at as i64,
                    key.chain,
                    key.network,
                    key.venue,
                    b256_str(key.on_chain_position_id),
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn list_positions(&self, filter: ListFilter) -> LedgerResult<Page<Position>> {
        let conn = self.conn.lock().unwrap();
        // positions order by opened_at; alias keeps the shared helper
        let (clause, args) = filter_clause(&filter, "chain", true);
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM positions{clause}"),
                rusqlite::params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let sql = format!(
            "SELECT {POSITION_COLS} FROM positions{clause} \
             ORDER BY opened_at DESC, id LIMIT ?{} OFFSET ?{}",
            args.len() + 1,
            args.len() + 2
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let mut all_args: Vec<Box<dyn rusqlite::types::ToSql>> = args
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn rusqlite::types::ToSql>)
            .collect();
        all_args.push(Box::new(filter.limit as i64));
        all_args.push(Box::new(filter.offset as i64));
        let items = stmt
            .query_map(rusqlite::params_from_iter(all_args), map_position)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(Page {
            items,
            total: total as u64,
        })
    }

    async fn cache_session(&self, session: &Session, cached_at: u64) -> LedgerResult<()> {
        let conn = self.conn.lock().unwrap();
        let adapters = serde_json::to_string(
            &session
                .allowed_adapters
                .iter()
                .map(|a| addr_str(*a))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());
        conn.execute(
            "INSERT OR REPLACE INTO sessions_cache (session_id, owner, executor, expires_at, \
             max_spend, spent, allowed_adapters, active, cached_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                b256_str(session.id),
                addr_str(session.owner),
                addr_str(session.executor),
                session.expires_at as i64,
                u256_str(session.max_spend),
                u256_str(session.spent),
                adapters,
                i64::from(session.active),
                cached_at as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn cached_session(&self, id: B256) -> LedgerResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT session_id, owner, executor, expires_at, max_spend, spent, \
                 allowed_adapters, active FROM sessions_cache WHERE session_id = ?1",
            )
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![b256_str(id)], |row| {
                let session_id: String = row.get(0)?;
                let owner: String = row.get(1)?;
                let executor: String = row.get(2)?;
                let max_spend: String = row.get(4)?;
                let spent: String = row.get(5)?;
                let adapters_json: String = row.get(6)?;
                let adapters: Vec<String> = serde_json::from_str(&adapters_json)
                    .map_err(|e| conv_err(LedgerError::Corrupt(format!("adapters: {e}"))))?;
                Ok(Session {
                    id: parse_b256(&session_id).map_err(conv_err)?,
                    owner: parse_addr(&owner).map_err(conv_err)?,
                    executor: parse_addr(&executor).map_err(conv_err)?,
                    expires_at: row.get::<_, i64>(3)? as u64,
                    max_spend: parse_u256(&max_spend).map_err(conv_err)?,
                    spent: parse_u256(&spent).map_err(conv_err)?,
                    allowed_adapters: adapters
                        .iter()
                        .map(|s| parse_addr(s).map_err(conv_err))
                        .collect::<Result<Vec<_>, _>>()?,
                    active: row.get::<_, i64>(7)? != 0,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows.pop())
    }

    async fn indexer_cursor(
        &self,
        chain: &str,
        network: &str,
        contract: Address,
    ) -> LedgerResult<Option<u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT last_indexed_block FROM indexer_state \
                 WHERE chain = ?1 AND network = ?2 AND contract_address = ?3",
            )
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![chain, network, addr_str(contract)], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows.pop().map(|v| v as u64))
    }

    async fn upsert_indexer_cursor(&self, cursor: &IndexerCursor) -> LedgerResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO indexer_state (chain, network, contract_address, last_indexed_block) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (chain, network, contract_address) \
             DO UPDATE SET last_indexed_block = excluded.last_indexed_block",
            params![
                cursor.chain,
                cursor.network,
                addr_str(cursor.contract_address),
                cursor.last_indexed_block as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn position_by_key_sync(conn: &Connection, key: &PositionKey) -> LedgerResult<Option<Position>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {POSITION_COLS} FROM positions \
             WHERE chain = ?1 AND network = ?2 AND venue = ?3 AND on_chain_position_id = ?4"
        ))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(
            params![
                key.chain,
                key.network,
                key.venue,
                b256_str(key.on_chain_position_id)
            ],
            map_position,
        )
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(rows.pop())
}
