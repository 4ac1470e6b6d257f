//! Relayed execution orchestrator: policy check, plan submission, receipt
//! confirmation and ledger bookkeeping for one on-chain attempt.
//!
//! The chain result is the product; ledger writes that fail are logged and
//! swallowed so a storage outage never blocks reporting what actually
//! happened on-chain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256};
use serde::Serialize;
use tracing::{debug, info, warn};

use blossom_chain::{
    ChainClient, ReceiptOutcome, ReceiptWatcher, SessionRouter, abi, decode_position_event,
};
use blossom_ledger::{DynLedger, LedgerResult, ListFilter, NewExecution, NewStep};
use blossom_types::{
    ActionPlan, DecodedAction, ErrorKind, ExecutionStatus, Intent, IntentStatus, Position, Session,
    SessionId, StepStatus, now_unix,
};

use crate::classify::classify;
use crate::error::{RelayerError, RelayerResult};
use crate::indexer::apply_position_event;
use crate::policy::{PolicyLimits, evaluate};

/// Outcomes kept in the in-process attempt log.
const ATTEMPT_LOG_CAPACITY: usize = 256;

/// How one relayed attempt resolved, as seen from the receipt side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Rejected by policy before any chain interaction.
    Rejected,
    /// Submission itself failed; nothing reached the mempool.
    Error,
    Confirmed,
    Failed,
    /// Indeterminate: the transaction may still land later.
    Timeout,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Rejected => "rejected",
            ReceiptStatus::Error => "error",
            ReceiptStatus::Confirmed => "confirmed",
            ReceiptStatus::Failed => "failed",
            ReceiptStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Fresh view of the session after a confirmed execution: the on-chain
/// session words plus the open positions the ledger currently tracks.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub open_positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub tx_hash: Option<B256>,
    pub receipt_status: ReceiptStatus,
    pub block_number: Option<u64>,
    pub error: Option<ErrorInfo>,
    pub snapshot: Option<SessionSnapshot>,
}

/// One entry of the bounded in-process attempt log.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub at: u64,
    pub session_id: SessionId,
    pub plan_hash: B256,
    pub receipt_status: ReceiptStatus,
    pub tx_hash: Option<B256>,
    pub error_code: Option<String>,
}

enum ChainRun {
    Rejected {
        code: String,
        message: String,
    },
    SendFailed {
        kind: ErrorKind,
        message: String,
    },
    Confirmed {
        tx_hash: B256,
        block_number: u64,
        gas_used: u64,
        latency_ms: u64,
    },
    Reverted {
        tx_hash: B256,
        block_number: u64,
        latency_ms: u64,
    },
    TimedOut {
        tx_hash: B256,
        latency_ms: u64,
    },
}

fn persist<T>(what: &str, result: LedgerResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(%err, what, "ledger write failed, continuing with chain result");
            None
        }
    }
}

pub struct Orchestrator {
    client: Arc<dyn ChainClient>,
    router: SessionRouter,
    ledger: DynLedger,
    watcher: ReceiptWatcher,
    limits: PolicyLimits,
    chain: String,
    network: String,
    venue: String,
    attempts: Mutex<VecDeque<AttemptRecord>>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        router_address: Address,
        ledger: DynLedger,
        watcher: ReceiptWatcher,
        limits: PolicyLimits,
        chain: impl Into<String>,
        network: impl Into<String>,
        venue: impl Into<String>,
    ) -> Self {
        let router = SessionRouter::new(router_address, Arc::clone(&client));
        Self {
            client,
            router,
            ledger,
            watcher,
            limits,
            chain: chain.into(),
            network: network.into(),
            venue: venue.into(),
            attempts: Mutex::new(VecDeque::with_capacity(ATTEMPT_LOG_CAPACITY)),
        }
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    /// Snapshot of the bounded attempt log, oldest first.
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.lock().unwrap().iter().cloned().collect()
    }

    /// Run the policy evaluator against the live session without
    /// submitting anything.
    pub async fn validate(
        &self,
        session_id: SessionId,
        user: Address,
        plan: &ActionPlan,
    ) -> RelayerResult<()> {
        evaluate(session_id, user, plan, &self.limits, &self.router, now_unix()).await
    }

    /// Validate, submit and confirm one plan. No linked intent; callers
    /// driving an intent lifecycle use [`Orchestrator::execute_for_intent`].
    pub async fn execute_relayed(
        &self,
        session_id: SessionId,
        user: Address,
        plan: &ActionPlan,
    ) -> ExecutionResult {
        self.execute(session_id, user, plan, None).await
    }

    /// Like [`Orchestrator::execute_relayed`], but on confirmation the
    /// execution row and the intent transition commit in one durable unit.
    pub async fn execute_for_intent(
        &self,
        session_id: SessionId,
        user: Address,
        plan: &ActionPlan,
        intent: &mut Intent,
    ) -> ExecutionResult {
        self.execute(session_id, user, plan, Some(intent)).await
    }

    async fn execute(
        &self,
        session_id: SessionId,
        user: Address,
        plan: &ActionPlan,
        intent: Option<&mut Intent>,
    ) -> ExecutionResult {
        let plan_hash = abi::plan_hash(plan);
        let intent_id = intent.as_ref().map(|i| i.id.clone());

        match self.run_chain(session_id, user, plan).await {
            ChainRun::Rejected { code, message } => {
                debug!(%plan_hash, code, "plan rejected by policy");
                self.record(session_id, plan_hash, ReceiptStatus::Rejected, None, Some(&code));
                ExecutionResult {
                    ok: false,
                    tx_hash: None,
                    receipt_status: ReceiptStatus::Rejected,
                    block_number: None,
                    error: Some(ErrorInfo { code, message }),
                    snapshot: None,
                }
            }
            ChainRun::SendFailed { kind, message } => {
                let mut new = self.new_execution(session_id, plan, intent_id);
                new.status = ExecutionStatus::Failed;
                new.error_code = Some(kind.as_str().to_string());
                new.error_message = Some(message.clone());
                persist("create execution", self.ledger.create_execution(new).await);
                self.record(
                    session_id,
                    plan_hash,
                    ReceiptStatus::Error,
                    None,
                    Some(kind.as_str()),
                );
                ExecutionResult {
                    ok: false,
                    tx_hash: None,
                    receipt_status: ReceiptStatus::Error,
                    block_number: None,
                    error: Some(ErrorInfo {
                        code: kind.as_str().to_string(),
                        message,
                    }),
                    snapshot: None,
                }
            }
            ChainRun::Confirmed {
                tx_hash,
                block_number,
                gas_used,
                latency_ms,
            } => {
                let mut new = self.new_execution(session_id, plan, intent_id.clone());
                new.status = ExecutionStatus::Confirmed;
                new.tx_hash = Some(tx_hash);
                new.block_number = Some(block_number);
                new.gas_used = Some(gas_used);
                new.latency_ms = Some(latency_ms);

                let execution = match intent {
                    Some(intent) => {
                        if let Err(err) = intent.transition(IntentStatus::Confirmed, now_unix()) {
                            warn!(%err, intent = %intent.id, "confirmed intent transition rejected");
                        }
                        persist(
                            "finalize execution",
                            self.ledger.finalize_execution(new, intent).await,
                        )
                    }
                    None => persist("create execution", self.ledger.create_execution(new).await),
                };
                let execution_id = execution.map(|e| e.id);
                if let Some(execution_id) = &execution_id {
                    self.record_steps(execution_id, plan).await;
                }
                self.reconcile_positions(tx_hash, block_number, intent_id, execution_id)
                    .await;
                let snapshot = self.rebuild_snapshot(session_id).await;

                info!(%tx_hash, block_number, gas_used, "relayed plan confirmed");
                self.record(session_id, plan_hash, ReceiptStatus::Confirmed, Some(tx_hash), None);
                ExecutionResult {
                    ok: true,
                    tx_hash: Some(tx_hash),
                    receipt_status: ReceiptStatus::Confirmed,
                    block_number: Some(block_number),
                    error: None,
                    snapshot,
                }
            }
            ChainRun::Reverted {
                tx_hash,
                block_number,
                latency_ms,
            } => {
                let message = format!("transaction reverted in block {block_number}");
                let mut new = self.new_execution(session_id, plan, intent_id);
                new.status = ExecutionStatus::Failed;
                new.tx_hash = Some(tx_hash);
                new.block_number = Some(block_number);
                new.latency_ms = Some(latency_ms);
                new.error_code = Some(ErrorKind::RelayerFailed.as_str().to_string());
                new.error_message = Some(message.clone());
                persist("create execution", self.ledger.create_execution(new).await);
                self.record(
                    session_id,
                    plan_hash,
                    ReceiptStatus::Failed,
                    Some(tx_hash),
                    Some(ErrorKind::RelayerFailed.as_str()),
                );
                ExecutionResult {
                    ok: false,
                    tx_hash: Some(tx_hash),
                    receipt_status: ReceiptStatus::Failed,
                    block_number: Some(block_number),
                    error: Some(ErrorInfo {
                        code: ErrorKind::RelayerFailed.as_str().to_string(),
                        message,
                    }),
                    snapshot: None,
                }
            }
            ChainRun::TimedOut { tx_hash, latency_ms } => {
                // indeterminate: the transaction was submitted and may
                // still land, so the row stays `submitted`
                let mut new = self.new_execution(session_id, plan, intent_id);
                new.status = ExecutionStatus::Submitted;
                new.tx_hash = Some(tx_hash);
                new.latency_ms = Some(latency_ms);
                persist("create execution", self.ledger.create_execution(new).await);
                self.record(
                    session_id,
                    plan_hash,
                    ReceiptStatus::Timeout,
                    Some(tx_hash),
                    Some("CHAIN_TIMEOUT"),
                );
                ExecutionResult {
                    ok: false,
                    tx_hash: Some(tx_hash),
                    receipt_status: ReceiptStatus::Timeout,
                    block_number: None,
                    error: Some(ErrorInfo {
                        code: "CHAIN_TIMEOUT".to_string(),
                        message: "receipt not observed within the confirmation window".to_string(),
                    }),
                    snapshot: None,
                }
            }
        }
    }

    async fn run_chain(&self, session_id: SessionId, user: Address, plan: &ActionPlan) -> ChainRun {
        if let Err(err) =
            evaluate(session_id, user, plan, &self.limits, &self.router, now_unix()).await
        {
            return match err {
                RelayerError::Policy { code, message } => ChainRun::Rejected {
                    code: code.as_str().to_string(),
                    message,
                },
                other => ChainRun::SendFailed {
                    kind: classify(&other.to_string()),
                    message: other.to_string(),
                },
            };
        }

        let plan_hash = abi::plan_hash(plan);
        info!(%plan_hash, session = %session_id, actions = plan.actions.len(), "submitting relayed plan");
        let started = tokio::time::Instant::now();
        let tx_hash = match self.router.execute_with_session(session_id, plan).await {
            Ok(hash) => hash,
            Err(err) => {
                let message = err.to_string();
                let mut kind = classify(&message);
                if kind == ErrorKind::Unclassified && err.is_revert() {
                    kind = ErrorKind::RelayerFailed;
                }
                return ChainRun::SendFailed { kind, message };
            }
        };

        let outcome = self.watcher.wait(self.client.as_ref(), tx_hash).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            ReceiptOutcome::Confirmed {
                block_number,
                gas_used,
            } => ChainRun::Confirmed {
                tx_hash,
                block_number,
                gas_used,
                latency_ms,
            },
            ReceiptOutcome::Failed { block_number } => ChainRun::Reverted {
                tx_hash,
                block_number,
                latency_ms,
            },
            ReceiptOutcome::Timeout => ChainRun::TimedOut { tx_hash, latency_ms },
        }
    }

    /// Skeleton execution row for this plan. Token fields come from the
    /// first action whose calldata decodes; callers fill in the outcome.
    fn new_execution(
        &self,
        session_id: SessionId,
        plan: &ActionPlan,
        intent_id: Option<String>,
    ) -> NewExecution {
        let mut token_in = None;
        let mut token_out = None;
        let mut amount_in = None;
        for action in &plan.actions {
            if let DecodedAction::Swap {
                token_in: t_in,
                token_out: t_out,
                amount_in: a_in,
            } = abi::decode_swap_action(&action.data)
            {
                token_in = Some(t_in);
                token_out = Some(t_out);
                amount_in = Some(a_in);
                break;
            }
        }
        NewExecution {
            chain: self.chain.clone(),
            network: self.network.clone(),
            kind: if token_in.is_some() { "swap" } else { "plan" }.to_string(),
            venue: Some(self.venue.clone()),
            token_in,
            token_out,
            amount_in,
            amount_out: None,
            tx_hash: None,
            status: ExecutionStatus::Pending,
            error_code: None,
            error_message: None,
            gas_used: None,
            block_number: None,
            latency_ms: None,
            relayer_address: Some(self.client.relayer_address()),
            session_id: Some(session_id),
            intent_id,
        }
    }

    async fn record_steps(&self, execution_id: &str, plan: &ActionPlan) {
        for (index, action) in plan.actions.iter().enumerate() {
            let step = persist(
                "create execution step",
                self.ledger
                    .create_step(NewStep {
                        execution_id: execution_id.to_string(),
                        step_index: index as u32,
                        action_type: action.action_type,
                        adapter: action.adapter,
                    })
                    .await,
            );
            // the plan executed atomically, so every step confirmed with it
            if let Some(step) = step {
                persist(
                    "update execution step",
                    self.ledger
                        .update_step(&step.id, StepStatus::Confirmed, None)
                        .await,
                );
            }
        }
    }

    /// Fold position events from the confirmed transaction into the
    /// ledger. Best-effort: the indexer replays the same block later and
    /// heals anything missed here.
    async fn reconcile_positions(
        &self,
        tx_hash: B256,
        block_number: u64,
        intent_id: Option<String>,
        execution_id: Option<String>,
    ) {
        let logs = match self
            .client
            .get_logs(self.router.address(), block_number, block_number)
            .await
        {
            Ok(logs) => logs,
            Err(err) => {
                warn!(%err, block_number, "could not fetch logs for confirmed tx");
                return;
            }
        };
        for log in logs.iter().filter(|l| l.tx_hash == tx_hash) {
            match decode_position_event(log) {
                Ok(Some(event)) => {
                    if let Err(err) = apply_position_event(
                        &self.ledger,
                        &self.chain,
                        &self.network,
                        &self.venue,
                        &event,
                        intent_id.clone(),
                        execution_id.clone(),
                    )
                    .await
                    {
                        warn!(%err, "position write failed, indexer will reconcile");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "undecodable router log on confirmed tx"),
            }
        }
    }

    async fn rebuild_snapshot(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        let session = match self.router.session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(err) => {
                debug!(%err, "session re-read failed after confirmation");
                return None;
            }
        };
        persist(
            "cache session",
            self.ledger.cache_session(&session, now_unix()).await,
        );
        let open_positions = self
            .ledger
            .list_positions(ListFilter {
                chain: Some(self.chain.clone()),
                network: Some(self.network.clone()),
                status: Some("open".to_string()),
                ..Default::default()
            })
            .await
            .map(|page| page.items)
            .unwrap_or_default();
        Some(SessionSnapshot {
            session,
            open_positions,
        })
    }

    fn record(
        &self,
        session_id: SessionId,
        plan_hash: B256,
        receipt_status: ReceiptStatus,
        tx_hash: Option<B256>,
        error_code: Option<&str>,
    ) {
        let mut attempts = self.attempts.lock().unwrap();
        if attempts.len() == ATTEMPT_LOG_CAPACITY {
            attempts.pop_front();
        }
        attempts.push_back(AttemptRecord {
            at: now_unix(),
            session_id,
            plan_hash,
            receipt_status,
            tx_hash,
            error_code: error_code.map(str::to_string),
        });
    }
}
