//! Networked Postgres backend.
//!
//! Assumes true concurrent writers across relayer instances: every write is
//! a single statement or an explicit transaction, and upserts go through
//! `ON CONFLICT` instead of read-then-write. All SQL is runtime-checked
//! (`sqlx::query`, not the compile-time macros) so builds do not need a
//! live database.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use blossom_types::{
    Execution, ExecutionStatus, ExecutionStep, FailureStage, IndexerCursor, Intent, IntentStatus,
    Position, PositionKey, PositionStatus, PositionSide, Session, StepStatus, now_unix,
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

pub struct PgLedger {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Backend(e.to_string())
}

impl PgLedger {
    /// Connect and bootstrap the schema. Bootstrap is idempotent, so
    /// concurrent instances racing on startup are harmless.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(db_err)?;
        for ddl in CREATE_TABLES {
            sqlx::query(ddl).execute(&pool).await.map_err(db_err)?;
        }
        for (table, column, ty) in ADDED_COLUMNS {
            let stmt = format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {ty}");
            sqlx::query(&stmt).execute(&pool).await.map_err(db_err)?;
            debug!(table, column, "ensured column");
        }
        Ok(Self { pool })
    }
}

// -- row mappers ---------------------------------------------------------

fn get_opt_u64(row: &PgRow, col: &str) -> LedgerResult<Option<u64>> {
    let v: Option<i64> = row.try_get(col).map_err(db_err)?;
    Ok(v.map(|v| v as u64))
}

fn map_intent(row: &PgRow) -> LedgerResult<Intent> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let failure_stage: Option<String> = row.try_get("failure_stage").map_err(db_err)?;
    let metadata_json: Option<String> = row.try_get("metadata_json").map_err(db_err)?;
    Ok(Intent {
        id: row.try_get("id").map_err(db_err)?,
        text: row.try_get("intent_text").map_err(db_err)?,
        kind: row.try_get("kind").map_err(db_err)?,
        requested_chain: row.try_get("requested_chain").map_err(db_err)?,
        requested_venue: row.try_get("requested_venue").map_err(db_err)?,
        usd_estimate: row.try_get("usd_estimate").map_err(db_err)?,
        status: parse_status(IntentStatus::parse, &status, "intent status")?,
        created_at: row.try_get::<i64, _>("created_at").map_err(db_err)? as u64,
        planned_at: get_opt_u64(row, "planned_at")?,
        executed_at: get_opt_u64(row, "executed_at")?,
        confirmed_at: get_opt_u64(row, "confirmed_at")?,
        failure_stage: failure_stage
            .map(|s| parse_status(FailureStage::parse, &s, "failure stage"))
            .transpose()?,
        error_code: row.try_get("error_code").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        metadata: metadata_json
            .map(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| LedgerError::Corrupt(format!("metadata: {e}")))
            })
            .transpose()?,
    })
}

fn map_execution(row: &PgRow) -> LedgerResult<Execution> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let opt_addr = |col: &str| -> LedgerResult<Option<Address>> {
        row.try_get::<Option<String>, _>(col)
            .map_err(db_err)?
            .map(|s| parse_addr(&s))
            .transpose()
    };
    let opt_amount = |col: &str| {
        row.try_get::<Option<String>, _>(col)
            .map_err(db_err)?
            .map(|s| parse_u256(&s))
            .transpose()
    };
    let opt_hash = |col: &str| -> LedgerResult<Option<B256>> {
        row.try_get::<Option<String>, _>(col)
            .map_err(db_err)?
            .map(|s| parse_b256(&s))
            .transpose()
    };
    Ok(Execution {
        id: row.try_get("id").map_err(db_err)?,
        chain: row.try_get("chain").map_err(db_err)?,
        network: row.try_get("network").map_err(db_err)?,
        kind: row.try_get("kind").map_err(db_err)?,
        venue: row.try_get("venue").map_err(db_err)?,
        token_in: opt_addr("token_in")?,
        token_out: opt_addr("token_out")?,
        amount_in: opt_amount("amount_in")?,
        amount_out: opt_amount("amount_out")?,
        tx_hash: opt_hash("tx_hash")?,
        status: parse_status(ExecutionStatus::parse, &status, "execution status")?,
        error_code: row.try_get("error_code").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        gas_used: get_opt_u64(row, "gas_used")?,
        block_number: get_opt_u64(row, "block_number")?,
        latency_ms: get_opt_u64(row, "latency_ms")?,
        relayer_address: opt_addr("relayer_address")?,
        session_id: opt_hash("session_id")?,
        intent_id: row.try_get("intent_id").map_err(db_err)?,
        created_at: row.try_get::<i64, _>("created_at").map_err(db_err)? as u64,
    })
}

fn map_position(row: &PgRow) -> LedgerResult<Position> {
    let side: String = row.try_get("side").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let margin: String = row.try_get("margin").map_err(db_err)?;
    let size: String = row.try_get("size").map_err(db_err)?;
    let entry: String = row.try_get("entry_price").map_err(db_err)?;
    let pos_id: String = row.try_get("on_chain_position_id").map_err(db_err)?;
    Ok(Position {
        id: row.try_get("id").map_err(db_err)?,
        chain: row.try_get("chain").map_err(db_err)?,
        network: row.try_get("network").map_err(db_err)?,
        venue: row.try_get("venue").map_err(db_err)?,
        market: row.try_get("market").map_err(db_err)?,
        side: parse_status(PositionSide::parse, &side, "position side")?,
        leverage: row.try_get("leverage").map_err(db_err)?,
        margin: parse_u256(&margin)?,
        size: parse_u256(&size)?,
        entry_price: parse_u256(&entry)?,
        status: parse_status(PositionStatus::parse, &status, "position status")?,
        opened_at: row.try_get::<i64, _>("opened_at").map_err(db_err)? as u64,
        closed_at: get_opt_u64(row, "closed_at")?,
        on_chain_position_id: parse_b256(&pos_id)?,
        intent_id: row.try_get("intent_id").map_err(db_err)?,
        execution_id: row.try_get("execution_id").map_err(db_err)?,
    })
}

fn map_step(row: &PgRow) -> LedgerResult<ExecutionStep> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let adapter: String = row.try_get("adapter").map_err(db_err)?;
    Ok(ExecutionStep {
        id: row.try_get("id").map_err(db_err)?,
        execution_id: row.try_get("execution_id").map_err(db_err)?,
        step_index: row.try_get::<i64, _>("step_index").map_err(db_err)? as u32,
        action_type: row.try_get::<i64, _>("action_type").map_err(db_err)? as u8,
        adapter: parse_addr(&adapter)?,
        status: parse_status(StepStatus::parse, &status, "step status")?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        created_at: row.try_get::<i64, _>("created_at").map_err(db_err)? as u64,
    })
}

// -- filter plumbing -----------------------------------------------------

fn filter_clause(filter: &ListFilter, chain_col: &str, with_network: bool) -> (String, Vec<String>) {
    let mut parts = Vec::new();
    let mut args = Vec::new();
    if let Some(chain) = &filter.chain {
        args.push(chain.clone());
        parts.push(format!("{chain_col} = ${}", args.len()));
    }
    if with_network {
        if let Some(network) = &filter.network {
            args.push(network.clone());
            parts.push(format!("network = ${}", args.len()));
        }
    }
    if let Some(status) = &filter.status {
        args.push(status.clone());
        parts.push(format!("status = ${}", args.len()));
    }
    let clause = if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    };
    (clause, args)
}

async fn list_page<T>(
    pool: &PgPool,
    table: &str,
    cols: &str,
    order_col: &str,
    chain_col: &str,
    with_network: bool,
    filter: &ListFilter,
    map: impl Fn(&PgRow) -> LedgerResult<T>,
) -> LedgerResult<Page<T>> {
    let (clause, args) = filter_clause(filter, chain_col, with_network);

    let count_sql = format!("SELECT COUNT(*) AS n FROM {table}{clause}");
    let mut count_query = sqlx::query(&count_sql);
    for a in &args {
        count_query = count_query.bind(a);
    }
    let total: i64 = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err)?
        .try_get("n")
        .map_err(db_err)?;

    let sql = format!(
        "SELECT {cols} FROM {table}{clause} ORDER BY {order_col} DESC, id \
         LIMIT ${} OFFSET ${}",
        args.len() + 1,
        args.len() + 2
    );
    let mut query = sqlx::query(&sql);
    for a in &args {
        query = query.bind(a);
    }
    let rows = query
        .bind(filter.limit as i64)
        .bind(filter.offset as i64)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
    let items = rows.iter().map(&map).collect::<LedgerResult<Vec<_>>>()?;
    Ok(Page {
        items,
        total: total as u64,
    })
}

// -- insert helpers shared with finalize ---------------------------------

const INSERT_EXECUTION_SQL: &str = "INSERT INTO executions (id, chain, network, kind, venue, \
     token_in, token_out, amount_in, amount_out, tx_hash, status, error_code, error_message, \
     gas_used, block_number, latency_ms, relayer_address, session_id, intent_id, created_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)";

const UPDATE_INTENT_SQL: &str = "UPDATE intents SET status = $1, planned_at = $2, \
     executed_at = $3, confirmed_at = $4, failure_stage = $5, error_code = $6, \
     error_message = $7, kind = $8, requested_venue = $9, usd_estimate = $10, \
     metadata_json = $11 WHERE id = $12";

fn build_execution(new: &NewExecution) -> Execution {
    Execution {
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
    }
}

fn bind_execution<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    e: &Execution,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(e.id.clone())
        .bind(e.chain.clone())
        .bind(e.network.clone())
        .bind(e.kind.clone())
        .bind(e.venue.clone())
        .bind(e.token_in.map(addr_str))
        .bind(e.token_out.map(addr_str))
        .bind(e.amount_in.map(u256_str))
        .bind(e.amount_out.map(u256_str))
        .bind(e.tx_hash.map(b256_str))
        .bind(e.status.as_str())
        .bind(e.error_code.clone())
        .bind(e.error_message.clone())
        .bind(e.gas_used.map(|v| v as i64))
        .bind(e.block_number.map(|v| v as i64))
        .bind(e.latency_ms.map(|v| v as i64))
        .bind(e.relayer_address.map(addr_str))
        .bind(e.session_id.map(b256_str))
        .bind(e.intent_id.clone())
        .bind(e.created_at as i64)
}

fn bind_intent_update<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    intent: &Intent,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(intent.status.as_str())
        .bind(intent.planned_at.map(|v| v as i64))
        .bind(intent.executed_at.map(|v| v as i64))
        .bind(intent.confirmed_at.map(|v| v as i64))
        .bind(intent.failure_stage.map(|s| s.as_str()))
        .bind(intent.error_code.clone())
        .bind(intent.error_message.clone())
        .bind(intent.kind.clone())
        .bind(intent.requested_venue.clone())
        .bind(intent.usd_estimate)
        .bind(
            intent
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default()),
        )
        .bind(intent.id.clone())
}

#[async_trait]
impl LedgerStore for PgLedger {
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
        sqlx::query(
            "INSERT INTO intents (id, intent_text, kind, requested_chain, requested_venue, \
             usd_estimate, status, created_at, metadata_json) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(intent.id.clone())
        .bind(intent.text.clone())
        .bind(intent.kind.clone())
        .bind(intent.requested_chain.clone())
        .bind(intent.requested_venue.clone())
        .bind(intent.usd_estimate)
        .bind(intent.status.as_str())
        .bind(intent.created_at as i64)
        .bind(
            intent
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default()),
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(intent)
    }

    async fn get_intent(&self, id: &str) -> LedgerResult<Option<Intent>> {
        let row = sqlx::query(&format!("SELECT {INTENT_COLS} FROM intents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_intent).transpose()
    }

    async fn update_intent(&self, intent: &Intent) -> LedgerResult<()> {
        let result = bind_intent_update(sqlx::query(UPDATE_INTENT_SQL), intent)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                what: "intent",
                id: intent.id.clone(),
            });
        }
        Ok(())
    }

    async fn list_intents(&self, filter: ListFilter) -> LedgerResult<Page<Intent>> {
        list_page(
            &self.pool,
            "intents",
            INTENT_COLS,
            "created_at",
            "requested_chain",
            false,
            &filter,
            map_intent,
        )
        .await
    }

    async fn create_execution(&self, new: NewExecution) -> LedgerResult<Execution> {
        let execution = build_execution(&new);
        bind_execution(sqlx::query(INSERT_EXECUTION_SQL), &execution)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(execution)
    }

    async fn get_execution(&self, id: &str) -> LedgerResult<Option<Execution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLS} FROM executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_execution).transpose()
    }

    async fn update_execution(&self, execution: &Execution) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE executions SET status = $1, tx_hash = $2, error_code = $3, \
             error_message = $4, gas_used = $5, block_number = $6, latency_ms = $7, \
             amount_out = $8 WHERE id = $9",
        )
        .bind(execution.status.as_str())
        .bind(execution.tx_hash.map(b256_str))
        .bind(execution.error_code.clone())
        .bind(execution.error_message.clone())
        .bind(execution.gas_used.map(|v| v as i64))
        .bind(execution.block_number.map(|v| v as i64))
        .bind(execution.latency_ms.map(|v| v as i64))
        .bind(execution.amount_out.map(u256_str))
        .bind(execution.id.clone())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                what: "execution",
                id: execution.id.clone(),
            });
        }
        Ok(())
    }

    async fn list_executions(&self, filter: ListFilter) -> LedgerResult<Page<Execution>> {
        list_page(
            &self.pool,
            "executions",
            EXECUTION_COLS,
            "created_at",
            "chain",
            true,
            &filter,
            map_execution,
        )
        .await
    }

    async fn executions_for_intent(&self, intent_id: &str) -> LedgerResult<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLS} FROM executions WHERE intent_id = $1 ORDER BY created_at, id"
        ))
        .bind(intent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_execution).collect()
    }

    async fn finalize_execution(
        &self,
        new: NewExecution,
        intent: &Intent,
    ) -> LedgerResult<Execution> {
        let execution = build_execution(&new);
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        bind_execution(sqlx::query(INSERT_EXECUTION_SQL), &execution)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let result = bind_intent_update(sqlx::query(UPDATE_INTENT_SQL), intent)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            // roll back the execution insert too
            tx.rollback().await.map_err(db_err)?;
            return Err(LedgerError::NotFound {
                what: "intent",
                id: intent.id.clone(),
            });
        }
        tx.commit().await.map_err(db_err)?;
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
        sqlx::query(
            "INSERT INTO execution_steps (id, execution_id, step_index, action_type, adapter, \
             status, error_message, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(step.id.clone())
        .bind(step.execution_id.clone())
        .bind(step.step_index as i64)
        .bind(step.action_type as i64)
        .bind(addr_str(step.adapter))
        .bind(step.status.as_str())
        .bind(step.error_message.clone())
        .bind(step.created_at as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(step)
    }

    async fn update_step(
        &self,
        id: &str,
        status: StepStatus,
        error_message: Option<String>,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE execution_steps SET status = $1, error_message = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                what: "execution step",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn steps_for_execution(&self, execution_id: &str) -> LedgerResult<Vec<ExecutionStep>> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLS} FROM execution_steps WHERE execution_id = $1 ORDER BY step_index"
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_step).collect()
    }

    async fn create_position_if_absent(&self, new: NewPosition) -> LedgerResult<Position> {
        let key = PositionKey {
            chain: new.chain.clone(),
            network: new.network.clone(),
            venue: new.venue.clone(),
            on_chain_position_id: new.on_chain_position_id,
        };
        sqlx::query(
            "INSERT INTO positions (id, chain, network, venue, market, side, leverage, margin, \
             size, entry_price, status, opened_at, closed_at, on_chain_position_id, intent_id, \
             execution_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (chain, network, venue, on_chain_position_id) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.chain.clone())
        .bind(new.network.clone())
        .bind(new.venue.clone())
        .bind(new.market.clone())
        .bind(new.side.as_str())
        .bind(new.leverage)
        .bind(u256_str(new.margin))
        .bind(u256_str(new.size))
        .bind(u256_str(new.entry_price))
        .bind(PositionStatus::Open.as_str())
        .bind(now_unix() as i64)
        .bind(Option::<i64>::None)
        .bind(b256_str(new.on_chain_position_id))
        .bind(new.intent_id.clone())
        .bind(new.execution_id.clone())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.position_by_key(&key).await?.ok_or(LedgerError::NotFound {
            what: "position",
            id: b256_str(key.on_chain_position_id),
        })
    }

    async fn position_by_key(&self, key: &PositionKey) -> LedgerResult<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLS} FROM positions \
             WHERE chain = $1 AND network = $2 AND venue = $3 AND on_chain_position_id = $4"
        ))
        .bind(key.chain.clone())
        .bind(key.network.clone())
        .bind(key.venue.clone())
        .bind(b256_str(key.on_chain_position_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_position).transpose()
    }

    async fn close_position(
        &self,
        key: &PositionKey,
        status: PositionStatus,
        closed_at: u64,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            "UPDATE positions SET status = $1, closed_at = $2 \
             WHERE chain = $3 AND network = $4 AND venue = $5 \
             AND on_chain_position_id = $6 AND status = 'open'",
        )
        .bind(status.as_str())
        .bind(closed_at as i64)
        .bind(key.chain.clone())
        .bind(key.network.clone())
        .bind(key.venue.clone())
        .bind(b256_str(key.on_chain_position_id))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_positions(&self, filter: ListFilter) -> LedgerResult<Page<Position>> {
        list_page(
            &self.pool,
            "positions",
            POSITION_COLS,
            "opened_at",
            "chain",
            true,
            &filter,
            map_position,
        )
        .await
    }

    async fn cache_session(&self, session: &Session, cached_at: u64) -> LedgerResult<()> {
        let adapters = serde_json::to_string(
            &session
                .allowed_adapters
                .iter()
                .map(|a| addr_str(*a))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());
        sqlx::query(
            "INSERT INTO sessions_cache (session_id, owner, executor, expires_at, max_spend, \
             spent, allowed_adapters, active, cached_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (session_id) DO UPDATE SET owner = excluded.owner, \
             executor = excluded.executor, expires_at = excluded.expires_at, \
             max_spend = excluded.max_spend, spent = excluded.spent, \
             allowed_adapters = excluded.allowed_adapters, active = excluded.active, \
             cached_at = excluded.cached_at",
        )
        .bind(b256_str(session.id))
        .bind(addr_str(session.owner))
        .bind(addr_str(session.executor))
        .bind(session.expires_at as i64)
        .bind(u256_str(session.max_spend))
        .bind(u256_str(session.spent))
        .bind(adapters)
        .bind(i64::from(session.active))
        .bind(cached_at as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn cached_session(&self, id: B256) -> LedgerResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT session_id, owner, executor, expires_at, max_spend, spent, \
             allowed_adapters, active FROM sessions_cache WHERE session_id = $1",
        )
        .bind(b256_str(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let session_id: String = row.try_get("session_id").map_err(db_err)?;
        let owner: String = row.try_get("owner").map_err(db_err)?;
        let executor: String = row.try_get("executor").map_err(db_err)?;
        let max_spend: String = row.try_get("max_spend").map_err(db_err)?;
        let spent: String = row.try_get("spent").map_err(db_err)?;
        let adapters_json: String = row.try_get("allowed_adapters").map_err(db_err)?;
        let adapters: Vec<String> = serde_json::from_str(&adapters_json)
            .map_err(|e| LedgerError::Corrupt(format!("adapters: {e}")))?;
        Ok(Some(Session {
            id: parse_b256(&session_id)?,
            owner: parse_addr(&owner)?,
            executor: parse_addr(&executor)?,
            expires_at: row.try_get::<i64, _>("expires_at").map_err(db_err)? as u64,
            max_spend: parse_u256(&max_spend)?,
            spent: parse_u256(&spent)?,
            allowed_adapters: adapters
                .iter()
                .map(|s| parse_addr(s))
                .collect::<LedgerResult<Vec<_>>>()?,
            active: row.try_get::<i64, _>("active").map_err(db_err)? != 0,
        }))
    }

    async fn indexer_cursor(
        &self,
        chain: &str,
        network: &str,
        contract: Address,
    ) -> LedgerResult<Option<u64>> {
        let row = sqlx::query(
            "SELECT last_indexed_block FROM indexer_state \
             WHERE chain = $1 AND network = $2 AND contract_address = $3",
        )
        .bind(chain)
        .bind(network)
        .bind(addr_str(contract))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row
            .map(|r| r.try_get::<i64, _>("last_indexed_block").map_err(db_err))
            .transpose()?
            .map(|v| v as u64))
    }

    async fn upsert_indexer_cursor(&self, cursor: &IndexerCursor) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO indexer_state (chain, network, contract_address, last_indexed_block) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (chain, network, contract_address) \
             DO UPDATE SET last_indexed_block = excluded.last_indexed_block",
        )
        .bind(cursor.chain.clone())
        .bind(cursor.network.clone())
        .bind(addr_str(cursor.contract_address))
        .bind(cursor.last_indexed_block as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
