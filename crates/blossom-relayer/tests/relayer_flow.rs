use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;

use blossom_chain::mock::MockChainClient;
use blossom_chain::{ChainClient, LogEntry, SessionWords, TxReceipt, position_opened_topic};
use blossom_ledger::{DynLedger, LedgerStore, ListFilter, SqliteLedger};
use blossom_relayer::{
    FixedPlanner, IntentOptions, IntentPlanner, LedgerConfig, PlannedRoute, PlanningError,
    ReceiptStatus, RelayerConfig, RelayerContext,
};
use blossom_types::{
    ActionPlan, IntentStatus, PlanAction, PositionStatus, SessionId, now_unix,
};

const ROUTER: Address = Address::repeat_byte(0x77);

fn user() -> Address {
    Address::repeat_byte(0xaa)
}

fn adapter() -> Address {
    Address::repeat_byte(0xbb)
}

fn session_id() -> SessionId {
    B256::repeat_byte(0x05)
}

fn config() -> RelayerConfig {
    RelayerConfig {
        rpc_url: "http://localhost:8545".into(),
        chain: "base".into(),
        network: "mainnet".into(),
        venue: "unidex".into(),
        chain_id: 8453,
        router_address: ROUTER,
        relayer_key: "11".repeat(32),
        allowed_adapters: vec![adapter()],
        allowed_tokens: vec![Address::repeat_byte(0x01), Address::repeat_byte(0x02)],
        max_value_per_tx: U256::from(1_000u64),
        max_swap_amount: U256::from(500u64),
        receipt_poll: Duration::from_secs(2),
        receipt_timeout: Duration::from_secs(60),
        indexer_poll: Duration::from_millis(50),
        indexer_start_block: 0,
        ledger: LedgerConfig::Sqlite {
            path: ":memory:".into(),
        },
    }
}

fn live_session() -> SessionWords {
    SessionWords {
        owner: user(),
        executor: Address::repeat_byte(0x7e),
        expires_at: now_unix() + 3_600,
        max_spend: U256::from(10_000u64),
        spent: U256::ZERO,
        active: true,
    }
}

fn swap_plan(amount_in: u64) -> ActionPlan {
    ActionPlan {
        user: user(),
        nonce: U256::from(1u64),
        deadline: now_unix() + 120,
        actions: vec![PlanAction {
            action_type: 0,
            adapter: adapter(),
            value: U256::ZERO,
            data: blossom_chain::abi::encode_swap_action(
                Address::repeat_byte(0x01),
                Address::repeat_byte(0x02),
                U256::from(amount_in),
                U256::ZERO,
            ),
        }],
    }
}

fn opaque_plan() -> ActionPlan {
    ActionPlan {
        user: user(),
        nonce: U256::from(2u64),
        deadline: now_unix() + 120,
        actions: vec![PlanAction {
            action_type: 3,
            adapter: adapter(),
            value: U256::ZERO,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        }],
    }
}

fn route_for(plan: ActionPlan) -> PlannedRoute {
    PlannedRoute {
        kind: "swap".into(),
        chain: "base".into(),
        venue: Some("unidex".into()),
        session_id: session_id(),
        user: user(),
        plan,
        usd_estimate: Some(100.0),
    }
}

fn planner_for(plan: ActionPlan) -> Arc<dyn IntentPlanner> {
    Arc::new(FixedPlanner::new(route_for(plan)))
}

/// Planner that answers each call with the next prepared route.
struct RotatingPlanner {
    routes: std::sync::Mutex<std::collections::VecDeque<PlannedRoute>>,
}

#[async_trait::async_trait]
impl IntentPlanner for RotatingPlanner {
    async fn plan(
        &self,
        _text: &str,
        _opts: &IntentOptions,
    ) -> std::result::Result<PlannedRoute, PlanningError> {
        self.routes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PlanningError("planner exhausted".into()))
    }
}

fn context_with(
    planner: Arc<dyn IntentPlanner>,
) -> Result<(RelayerContext, Arc<MockChainClient>)> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mock = Arc::new(MockChainClient::new());
    mock.set_session(session_id(), live_session());
    let client: Arc<dyn ChainClient> = mock.clone();
    let ledger: DynLedger = Arc::new(SqliteLedger::in_memory()?);
    Ok((
        RelayerContext::with_parts(config(), client, ledger, planner),
        mock,
    ))
}

fn context() -> Result<(RelayerContext, Arc<MockChainClient>)> {
    context_with(planner_for(swap_plan(100)))
}

fn script_confirmation(mock: &MockChainClient, block_number: u64) {
    mock.push_receipt(None);
    mock.push_receipt(None);
    mock.push_receipt(Some(TxReceipt {
        success: true,
        block_number,
        gas_used: 90_000,
    }));
}

/// Tx hash the mock assigns to its n-th submission.
fn tx_hash_n(n: u64) -> B256 {
    B256::from(U256::from(n).to_be_bytes::<32>())
}

#[tokio::test(start_paused = true)]
async fn foreign_adapter_never_reaches_the_chain() -> Result<()> {
    let (ctx, mock) = context()?;
    let mut plan = swap_plan(100);
    plan.actions[0].adapter = Address::repeat_byte(0xcc);

    let result = ctx
        .orchestrator
        .execute_relayed(session_id(), user(), &plan)
        .await;

    assert!(!result.ok);
    assert_eq!(result.receipt_status, ReceiptStatus::Rejected);
    assert_eq!(result.error.as_ref().unwrap().code, "ADAPTER_NOT_ALLOWED");
    assert!(mock.submitted().is_empty());

    // a rejection is not an attempted call, so no execution row
    let page = ctx.ledger.list_executions(ListFilter::default()).await?;
    assert_eq!(page.total, 0);

    let attempts = ctx.orchestrator.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].receipt_status, ReceiptStatus::Rejected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confirmed_plan_lands_in_the_ledger() -> Result<()> {
    let (ctx, mock) = context()?;
    script_confirmation(&mock, 1_234);

    let result = ctx
        .orchestrator
        .execute_relayed(session_id(), user(), &swap_plan(100))
        .await;

    assert!(result.ok);
    assert_eq!(result.receipt_status, ReceiptStatus::Confirmed);
    assert_eq!(result.block_number, Some(1_234));
    assert_eq!(result.tx_hash, Some(tx_hash_n(1)));
    assert_eq!(mock.receipt_polls(), 3);

    let snapshot = result.snapshot.expect("confirmed runs rebuild a snapshot");
    assert_eq!(snapshot.session.owner, user());

    let page = ctx.ledger.list_executions(ListFilter::default()).await?;
    assert_eq!(page.total, 1);
    let execution = &page.items[0];
    assert_eq!(execution.status.as_str(), "confirmed");
    assert_eq!(execution.kind, "swap");
    assert_eq!(execution.token_in, Some(Address::repeat_byte(0x01)));
    assert_eq!(execution.amount_in, Some(U256::from(100u64)));
    assert_eq!(execution.gas_used, Some(90_000));
    assert_eq!(execution.session_id, Some(session_id()));

    let steps = ctx.ledger.steps_for_execution(&execution.id).await?;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status.as_str(), "confirmed");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confirmed_plan_records_position_events_from_its_block() -> Result<()> {
    let (ctx, mock) = context()?;
    script_confirmation(&mock, 500);

    let position_id = B256::repeat_byte(0x42);
    let mut data = Vec::new();
    data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>()); // long
    data.extend_from_slice(&U256::from(500u64).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(1_000u64).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(3_200u64).to_be_bytes::<32>());
    mock.push_log(LogEntry {
        address: ROUTER,
        topics: vec![
            position_opened_topic(),
            position_id,
            B256::left_padding_from(user().as_slice()),
        ],
        data,
        block_number: 500,
        log_index: 0,
        tx_hash: tx_hash_n(1),
    });

    let result = ctx
        .orchestrator
        .execute_relayed(session_id(), user(), &swap_plan(100))
        .await;
    assert!(result.ok);

    let positions = ctx.ledger.list_positions(ListFilter::default()).await?;
    assert_eq!(positions.total, 1);
    assert_eq!(positions.items[0].status, PositionStatus::Open);
    assert_eq!(positions.items[0].on_chain_position_id, position_id);
    assert_eq!(result.snapshot.unwrap().open_positions.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn indeterminable_spend_surfaces_as_relayer_failed() -> Result<()> {
    // spent 9_500 of 10_000; the opaque calldata hides the 1_000 spend,
    // so the evaluator lets it through and the chain rejects it
    let (ctx, mock) = context()?;
    let mut words = live_session();
    words.spent = U256::from(9_500u64);
    mock.set_session(session_id(), words);
    mock.fail_next_send("execution reverted: spend cap exceeded");

    let result = ctx
        .orchestrator
        .execute_relayed(session_id(), user(), &opaque_plan())
        .await;

    assert!(!result.ok);
    assert_eq!(result.receipt_status, ReceiptStatus::Error);
    assert_eq!(result.error.as_ref().unwrap().code, "RELAYER_FAILED");

    let page = ctx.ledger.list_executions(ListFilter::default()).await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].status.as_str(), "failed");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn mined_revert_is_failed_with_relayer_code() -> Result<()> {
    let (ctx, mock) = context()?;
    mock.push_receipt(Some(TxReceipt {
        success: false,
        block_number: 77,
        gas_used: 40_000,
    }));

    let result = ctx
        .orchestrator
        .execute_relayed(session_id(), user(), &swap_plan(100))
        .await;

    assert!(!result.ok);
    assert_eq!(result.receipt_status, ReceiptStatus::Failed);
    assert_eq!(result.block_number, Some(77));
    assert_eq!(result.error.as_ref().unwrap().code, "RELAYER_FAILED");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn receipt_timeout_is_indeterminate() -> Result<()> {
    // no receipts scripted: every poll answers null until the window ends
    let (ctx, mock) = context()?;

    let result = ctx
        .orchestrator
        .execute_relayed(session_id(), user(), &swap_plan(100))
        .await;

    assert!(!result.ok);
    assert_eq!(result.receipt_status, ReceiptStatus::Timeout);
    assert_eq!(result.error.as_ref().unwrap().code, "CHAIN_TIMEOUT");
    assert_eq!(mock.receipt_polls(), 31);

    // the transaction really was submitted, so the row stays `submitted`
    let page = ctx.ledger.list_executions(ListFilter::default()).await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].status.as_str(), "submitted");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_intent_drives_the_full_lifecycle() -> Result<()> {
    let (ctx, mock) = context()?;
    script_confirmation(&mock, 900);

    let outcome = ctx
        .intents
        .run_intent("swap 100 USDC for WETH", IntentOptions::default())
        .await?;

    assert!(outcome.ok);
    assert_eq!(outcome.status, IntentStatus::Confirmed);
    assert!(outcome.tx_hash.is_some());

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.status, IntentStatus::Confirmed);
    assert_eq!(intent.kind, "swap");
    assert!(intent.planned_at.is_some());
    assert!(intent.executed_at.is_some());
    assert!(intent.confirmed_at.is_some());

    let executions = ctx.ledger.executions_for_intent(&outcome.intent_id).await?;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status.as_str(), "confirmed");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn plan_only_halts_then_confirm_by_id_completes() -> Result<()> {
    let (ctx, mock) = context()?;

    let outcome = ctx
        .intents
        .run_intent(
            "swap 100 USDC for WETH",
            IntentOptions {
                plan_only: true,
                ..Default::default()
            },
        )
        .await?;
    assert!(outcome.ok);
    assert_eq!(outcome.status, IntentStatus::Routed);
    assert!(mock.submitted().is_empty());
    assert_eq!(
        ctx.ledger.list_executions(ListFilter::default()).await?.total,
        0
    );

    script_confirmation(&mock, 1_000);
    let confirmed = ctx.intents.execute_intent_by_id(&outcome.intent_id).await?;
    assert!(confirmed.ok);
    assert_eq!(confirmed.status, IntentStatus::Confirmed);
    assert_eq!(mock.submitted().len(), 1);
    assert_eq!(
        ctx.ledger.executions_for_intent(&outcome.intent_id).await?.len(),
        1
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn routed_intent_persists_only_the_plan_hash() -> Result<()> {
    let plan = swap_plan(100);
    let expected_hash = blossom_chain::abi::plan_hash(&plan);
    let (ctx, _mock) = context_with(planner_for(plan))?;

    let outcome = ctx
        .intents
        .run_intent(
            "swap 100 USDC for WETH",
            IntentOptions {
                plan_only: true,
                ..Default::default()
            },
        )
        .await?;
    assert!(outcome.ok);

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    let metadata = intent.metadata.expect("routed intents record a plan hash");
    let map = metadata.as_object().unwrap();
    // the hash is the only thing the row carries about the plan
    assert_eq!(map.len(), 1);
    let stored: B256 = map["plan_hash"].as_str().unwrap().parse()?;
    assert_eq!(stored, expected_hash);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confirm_by_id_refuses_a_plan_that_no_longer_matches() -> Result<()> {
    // the planner answers differently the second time, so the routed
    // hash no longer covers what would be submitted
    let planner = Arc::new(RotatingPlanner {
        routes: std::sync::Mutex::new(std::collections::VecDeque::from([
            route_for(swap_plan(100)),
            route_for(swap_plan(250)),
        ])),
    });
    let (ctx, mock) = context_with(planner)?;

    let outcome = ctx
        .intents
        .run_intent(
            "swap 100 USDC for WETH",
            IntentOptions {
                plan_only: true,
                ..Default::default()
            },
        )
        .await?;
    assert!(outcome.ok);

    let refused = ctx.intents.execute_intent_by_id(&outcome.intent_id).await?;
    assert!(!refused.ok);
    assert_eq!(refused.error.as_ref().unwrap().code, "PLAN_CHANGED");
    assert!(mock.submitted().is_empty());

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(intent.failure_stage.map(|s| s.as_str()), Some("execute"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timed_out_intent_stays_executing() -> Result<()> {
    // no receipts scripted: the confirmation window elapses with the
    // transaction still in flight
    let (ctx, mock) = context()?;

    let outcome = ctx
        .intents
        .run_intent("swap 100 USDC for WETH", IntentOptions::default())
        .await?;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, IntentStatus::Executing);
    assert_eq!(outcome.error.as_ref().unwrap().code, "CHAIN_TIMEOUT");
    assert!(outcome.tx_hash.is_some());
    assert_eq!(mock.submitted().len(), 1);

    // indeterminate, not failed: the transaction may still land
    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.status, IntentStatus::Executing);
    assert!(intent.failure_stage.is_none());
    assert!(intent.error_code.is_none());

    let executions = ctx.ledger.executions_for_intent(&outcome.intent_id).await?;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status.as_str(), "submitted");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confirm_by_id_will_not_resubmit_an_in_flight_intent() -> Result<()> {
    let (ctx, mock) = context()?;
    let outcome = ctx
        .intents
        .run_intent("swap 100 USDC for WETH", IntentOptions::default())
        .await?;
    assert_eq!(outcome.status, IntentStatus::Executing);
    let sends = mock.submitted().len();

    let refused = ctx.intents.execute_intent_by_id(&outcome.intent_id).await?;
    assert!(!refused.ok);
    assert_eq!(refused.status, IntentStatus::Executing);
    assert_eq!(refused.error.as_ref().unwrap().code, "EXECUTION_IN_FLIGHT");
    assert_eq!(mock.submitted().len(), sends);

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.status, IntentStatus::Executing);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confirming_a_terminal_intent_is_idempotent() -> Result<()> {
    let (ctx, mock) = context()?;
    script_confirmation(&mock, 900);

    let first = ctx
        .intents
        .run_intent("swap 100 USDC for WETH", IntentOptions::default())
        .await?;
    assert!(first.ok);
    let polls = mock.receipt_polls();
    let sends = mock.submitted().len();

    let again = ctx.intents.execute_intent_by_id(&first.intent_id).await?;
    assert!(again.ok);
    assert_eq!(again.status, IntentStatus::Confirmed);
    // no new chain work, no duplicate execution row
    assert_eq!(mock.receipt_polls(), polls);
    assert_eq!(mock.submitted().len(), sends);
    assert_eq!(
        ctx.ledger.executions_for_intent(&first.intent_id).await?.len(),
        1
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn planning_failure_is_terminal_at_the_plan_stage() -> Result<()> {
    let (ctx, _mock) = context_with(Arc::new(FixedPlanner::failing("no venue for request")))?;

    let outcome = ctx
        .intents
        .run_intent("do something impossible", IntentOptions::default())
        .await?;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, IntentStatus::Failed);
    assert_eq!(outcome.error.as_ref().unwrap().code, "PLANNING_FAILED");

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.failure_stage.map(|s| s.as_str()), Some("plan"));
    assert_eq!(intent.error_code.as_deref(), Some("PLANNING_FAILED"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn policy_rejection_fails_the_intent_at_the_route_stage() -> Result<()> {
    let mut plan = swap_plan(100);
    plan.actions[0].adapter = Address::repeat_byte(0xcc);
    let (ctx, mock) = context_with(planner_for(plan))?;

    let outcome = ctx
        .intents
        .run_intent("swap through a shady adapter", IntentOptions::default())
        .await?;

    assert!(!outcome.ok);
    assert_eq!(outcome.error.as_ref().unwrap().code, "ADAPTER_NOT_ALLOWED");
    assert!(mock.submitted().is_empty());

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(intent.failure_stage.map(|s| s.as_str()), Some("route"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reverted_intent_fails_at_the_confirm_stage() -> Result<()> {
    let (ctx, mock) = context()?;
    mock.push_receipt(Some(TxReceipt {
        success: false,
        block_number: 10,
        gas_used: 30_000,
    }));

    let outcome = ctx
        .intents
        .run_intent("swap 100 USDC for WETH", IntentOptions::default())
        .await?;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, IntentStatus::Failed);
    assert_eq!(outcome.error.as_ref().unwrap().code, "RELAYER_FAILED");

    let intent = ctx.ledger.get_intent(&outcome.intent_id).await?.unwrap();
    assert_eq!(intent.failure_stage.map(|s| s.as_str()), Some("confirm"));
    assert!(intent.executed_at.is_some());
    Ok(())
}
