//! Intent lifecycle controller: drives an intent from `queued` through
//! plan, route, execute and confirm, recording the failing stage when any
//! step gives up.
//!
//! Planning from natural-language text is an external collaborator behind
//! [`IntentPlanner`]; this crate ships the trait and a fixed planner for
//! tests and demos.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use blossom_chain::abi;
use blossom_ledger::{DynLedger, LedgerError, NewIntent};
use blossom_types::{ActionPlan, FailureStage, Intent, IntentStatus, SessionId, now_unix};

use crate::error::{RelayerError, RelayerResult};
use crate::orchestrator::{ErrorInfo, Orchestrator, ReceiptStatus};

/// Metadata key holding the hash of the routed plan. Plans are ephemeral;
/// only this hash is ever written to the ledger.
const PLAN_HASH_KEY: &str = "plan_hash";

/// A concrete route produced from intent text: which session signs, which
/// user it acts for, and the plan to submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub kind: String,
    pub chain: String,
    pub venue: Option<String>,
    pub session_id: SessionId,
    pub user: Address,
    pub plan: ActionPlan,
    pub usd_estimate: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
#[error("planning failed: {0}")]
pub struct PlanningError(pub String);

/// Turns intent text into a [`PlannedRoute`]. LLM-backed planners live
/// outside the core behind this trait.
#[async_trait]
pub trait IntentPlanner: Send + Sync {
    async fn plan(&self, text: &str, opts: &IntentOptions) -> Result<PlannedRoute, PlanningError>;
}

/// Planner that always answers with one prepared route (or one prepared
/// failure). Used by tests and demos.
pub struct FixedPlanner {
    route: Result<PlannedRoute, String>,
}

impl FixedPlanner {
    pub fn new(route: PlannedRoute) -> Self {
        Self { route: Ok(route) }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            route: Err(message.into()),
        }
    }
}

#[async_trait]
impl IntentPlanner for FixedPlanner {
    async fn plan(&self, _text: &str, _opts: &IntentOptions) -> Result<PlannedRoute, PlanningError> {
        self.route.clone().map_err(PlanningError)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntentOptions {
    pub chain: Option<String>,
    /// Halt after routing; the plan executes later via
    /// [`IntentController::execute_intent_by_id`].
    pub plan_only: bool,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub ok: bool,
    pub intent_id: String,
    pub status: IntentStatus,
    pub tx_hash: Option<B256>,
    pub error: Option<ErrorInfo>,
}

pub struct IntentController {
    ledger: DynLedger,
    orchestrator: Arc<Orchestrator>,
    planner: Arc<dyn IntentPlanner>,
    default_chain: String,
}

impl IntentController {
    pub fn new(
        ledger: DynLedger,
        orchestrator: Arc<Orchestrator>,
        planner: Arc<dyn IntentPlanner>,
        default_chain: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            orchestrator,
            planner,
            default_chain: default_chain.into(),
        }
    }

    /// Create and drive a new intent. With `plan_only` the pipeline stops
    /// at `routed`; only the plan's hash is recorded for a later
    /// confirm-by-id.
    pub async fn run_intent(&self, text: &str, opts: IntentOptions) -> RelayerResult<IntentOutcome> {
        // without a row there is nothing to track, so creation failure is
        // a hard error rather than a swallowed one
        let mut intent = self
            .ledger
            .create_intent(NewIntent {
                text: text.to_string(),
                kind: "unknown".to_string(),
                requested_chain: opts
                    .chain
                    .clone()
                    .unwrap_or_else(|| self.default_chain.clone()),
                requested_venue: None,
                usd_estimate: None,
                metadata: opts.metadata.clone(),
            })
            .await?;

        let route = match self.planner.plan(text, &opts).await {
            Ok(route) => route,
            Err(err) => {
                return Ok(self
                    .fail(intent, FailureStage::Plan, "PLANNING_FAILED", err.0, None)
                    .await);
            }
        };
        intent.kind = route.kind.clone();
        intent.requested_chain = route.chain.clone();
        intent.requested_venue = route.venue.clone();
        intent.usd_estimate = route.usd_estimate;
        self.step(&mut intent, IntentStatus::Planned);

        // routing runs the policy evaluator without submitting
        match self
            .orchestrator
            .validate(route.session_id, route.user, &route.plan)
            .await
        {
            Ok(()) => {}
            Err(RelayerError::Policy { code, message }) => {
                return Ok(self
                    .fail(intent, FailureStage::Route, code.as_str(), message, None)
                    .await);
            }
            Err(other) => {
                return Ok(self
                    .fail(
                        intent,
                        FailureStage::Route,
                        other.code(),
                        other.to_string(),
                        None,
                    )
                    .await);
            }
        }
        self.step(&mut intent, IntentStatus::Routed);
        stash_plan_hash(&mut intent, abi::plan_hash(&route.plan));
        self.ledger.update_intent(&intent).await?;

        if opts.plan_only {
            info!(intent = %intent.id, "plan-only intent routed, awaiting confirm-by-id");
            return Ok(IntentOutcome {
                ok: true,
                intent_id: intent.id.clone(),
                status: intent.status,
                tx_hash: None,
                error: None,
            });
        }
        self.execute(intent, route).await
    }

    /// Execute a previously routed intent. Idempotent for terminal
    /// intents: the stored result comes back without touching the chain
    /// or creating new execution rows.
    ///
    /// Plans are never persisted, so the planner runs again on the stored
    /// intent text; its output must hash to the value recorded at routing
    /// time or the execution is refused.
    pub async fn execute_intent_by_id(&self, id: &str) -> RelayerResult<IntentOutcome> {
        let Some(mut intent) = self.ledger.get_intent(id).await? else {
            return Err(RelayerError::Persistence(LedgerError::NotFound {
                what: "intent",
                id: id.to_string(),
            }));
        };
        if intent.status.is_terminal() {
            let error = intent.error_code.clone().map(|code| ErrorInfo {
                code,
                message: intent.error_message.clone().unwrap_or_default(),
            });
            return Ok(IntentOutcome {
                ok: intent.status == IntentStatus::Confirmed,
                intent_id: intent.id.clone(),
                status: intent.status,
                tx_hash: None,
                error,
            });
        }
        if intent.status == IntentStatus::Executing {
            // a transaction may already be in the mempool (crash, or a
            // receipt window that elapsed); resubmitting could double-spend
            warn!(intent = %intent.id, "refusing to resubmit an in-flight intent");
            return Ok(IntentOutcome {
                ok: false,
                intent_id: intent.id.clone(),
                status: intent.status,
                tx_hash: None,
                error: Some(ErrorInfo {
                    code: "EXECUTION_IN_FLIGHT".to_string(),
                    message: "intent already submitted a transaction".to_string(),
                }),
            });
        }

        let Some(expected_hash) = stored_plan_hash(&intent) else {
            return Ok(self
                .fail(
                    intent,
                    FailureStage::Execute,
                    "ROUTE_MISSING",
                    "intent has no recorded plan hash".to_string(),
                    None,
                )
                .await);
        };
        let opts = IntentOptions {
            chain: Some(intent.requested_chain.clone()),
            ..Default::default()
        };
        let route = match self.planner.plan(&intent.text, &opts).await {
            Ok(route) => route,
            Err(err) => {
                return Ok(self
                    .fail(intent, FailureStage::Plan, "PLANNING_FAILED", err.0, None)
                    .await);
            }
        };
        let fresh_hash = abi::plan_hash(&route.plan);
        if fresh_hash != expected_hash {
            return Ok(self
                .fail(
                    intent,
                    FailureStage::Execute,
                    "PLAN_CHANGED",
                    format!("re-planned hash {fresh_hash} does not match routed hash {expected_hash}"),
                    None,
                )
                .await);
        }
        if intent.status == IntentStatus::Planned {
            self.step(&mut intent, IntentStatus::Routed);
        }
        self.execute(intent, route).await
    }

    async fn execute(
        &self,
        mut intent: Intent,
        route: PlannedRoute,
    ) -> RelayerResult<IntentOutcome> {
        self.step(&mut intent, IntentStatus::Executing);
        if let Err(err) = self.ledger.update_intent(&intent).await {
            warn!(%err, intent = %intent.id, "could not persist executing status");
        }

        let result = self
            .orchestrator
            .execute_for_intent(route.session_id, route.user, &route.plan, &mut intent)
            .await;

        match result.receipt_status {
            ReceiptStatus::Confirmed => Ok(IntentOutcome {
                ok: true,
                intent_id: intent.id.clone(),
                status: intent.status,
                tx_hash: result.tx_hash,
                error: None,
            }),
            ReceiptStatus::Rejected | ReceiptStatus::Error => {
                let (code, message) = split_error(result.error);
                Ok(self
                    .fail(intent, FailureStage::Execute, &code, message, result.tx_hash)
                    .await)
            }
            ReceiptStatus::Failed => {
                let (code, message) = split_error(result.error);
                Ok(self
                    .fail(intent, FailureStage::Confirm, &code, message, result.tx_hash)
                    .await)
            }
            ReceiptStatus::Timeout => {
                // indeterminate: the transaction may still land, so the
                // intent stays `executing` rather than failing
                let (code, message) = split_error(result.error);
                warn!(intent = %intent.id, "confirmation window elapsed, intent left executing");
                Ok(IntentOutcome {
                    ok: false,
                    intent_id: intent.id.clone(),
                    status: intent.status,
                    tx_hash: result.tx_hash,
                    error: Some(ErrorInfo { code, message }),
                })
            }
        }
    }

    /// Forward-step the in-memory intent; illegal transitions only warn
    /// because the status came from our own pipeline.
    fn step(&self, intent: &mut Intent, next: IntentStatus) {
        if let Err(err) = intent.transition(next, now_unix()) {
            warn!(%err, intent = %intent.id, "unexpected lifecycle state");
        }
    }

    async fn fail(
        &self,
        mut intent: Intent,
        stage: FailureStage,
        code: &str,
        message: String,
        tx_hash: Option<B256>,
    ) -> IntentOutcome {
        if !intent.status.is_terminal()
            && intent.transition(IntentStatus::Failed, now_unix()).is_ok()
        {
            intent.failure_stage = Some(stage);
            intent.error_code = Some(code.to_string());
            intent.error_message = Some(message.clone());
            if let Err(err) = self.ledger.update_intent(&intent).await {
                warn!(%err, intent = %intent.id, "could not persist failed intent");
            }
        }
        IntentOutcome {
            ok: false,
            intent_id: intent.id.clone(),
            status: intent.status,
            tx_hash,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message,
            }),
        }
    }
}

fn stash_plan_hash(intent: &mut Intent, plan_hash: B256) {
    let mut metadata = intent
        .metadata
        .take()
        .unwrap_or_else(|| Value::Object(Default::default()));
    if let Value::Object(map) = &mut metadata {
        map.insert(PLAN_HASH_KEY.to_string(), Value::String(plan_hash.to_string()));
    }
    intent.metadata = Some(metadata);
}

fn stored_plan_hash(intent: &Intent) -> Option<B256> {
    intent
        .metadata
        .as_ref()?
        .get(PLAN_HASH_KEY)?
        .as_str()?
        .parse()
        .ok()
}

fn split_error(error: Option<ErrorInfo>) -> (String, String) {
    match error {
        Some(e) => (e.code, e.message),
        None => ("UNCLASSIFIED".to_string(), String::new()),
    }
}
