//! Store conformance suite shared by both backends. Each function takes
//! the trait object so the same assertions run against SQLite and
//! Postgres.

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;

use blossom_ledger::{LedgerError, LedgerStore, ListFilter, NewExecution, NewIntent, NewPosition, NewStep};
use blossom_types::{
    ExecutionStatus, IndexerCursor, IntentStatus, PositionKey, PositionSide, PositionStatus,
    Session, StepStatus, now_unix,
};

pub fn sample_intent() -> NewIntent {
    NewIntent {
        text: "open 2x long on eth-perp".into(),
        kind: "perp_open".into(),
        requested_chain: "base".into(),
        requested_venue: Some("unidex".into()),
        usd_estimate: Some(250.0),
        metadata: Some(serde_json::json!({"source": "test"})),
    }
}

pub fn sample_execution(intent_id: Option<String>) -> NewExecution {
    NewExecution {
        chain: "base".into(),
        network: "mainnet".into(),
        kind: "swap".into(),
        venue: Some("uniswap".into()),
        token_in: Some(Address::repeat_byte(0x11)),
        token_out: Some(Address::repeat_byte(0x22)),
        amount_in: Some(U256::from(1_000_000u64)),
        amount_out: None,
        tx_hash: None,
        status: ExecutionStatus::Pending,
        error_code: None,
        error_message: None,
        gas_used: None,
        block_number: None,
        latency_ms: None,
        relayer_address: Some(Address::repeat_byte(0x7e)),
        session_id: Some(B256::repeat_byte(0xaa)),
        intent_id,
    }
}

fn sample_position(id_byte: u8) -> NewPosition {
    NewPosition {
        chain: "base".into(),
        network: "mainnet".into(),
        venue: "unidex".into(),
        market: "ETH-USD".into(),
        side: PositionSide::Long,
        leverage: Some(2.0),
        margin: U256::from(500u64),
        size: U256::from(1000u64),
        entry_price: U256::from(3200u64),
        on_chain_position_id: B256::repeat_byte(id_byte),
        intent_id: None,
        execution_id: None,
    }
}

pub async fn intent_roundtrip_and_update(ledger: &dyn LedgerStore) -> Result<()> {
    let created = ledger.create_intent(sample_intent()).await?;
    assert_eq!(created.status, IntentStatus::Queued);
    assert!(created.planned_at.is_none());

    let mut fetched = ledger.get_intent(&created.id).await?.unwrap();
    assert_eq!(fetched.text, "open 2x long on eth-perp");
    assert_eq!(fetched.requested_venue.as_deref(), Some("unidex"));
    assert_eq!(fetched.metadata, created.metadata);

    fetched.transition(IntentStatus::Planned, now_unix()).unwrap();
    ledger.update_intent(&fetched).await?;

    let again = ledger.get_intent(&created.id).await?.unwrap();
    assert_eq!(again.status, IntentStatus::Planned);
    assert!(again.planned_at.is_some());
    Ok(())
}

pub async fn update_missing_intent_is_not_found(ledger: &dyn LedgerStore) -> Result<()> {
    let mut intent = ledger.create_intent(sample_intent()).await?;
    intent.id = "no-such-intent".into();

    let err = ledger.update_intent(&intent).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { what: "intent", .. }));
    Ok(())
}

pub async fn list_intents_pages_and_reports_total(ledger: &dyn LedgerStore) -> Result<()> {
    for i in 0..7 {
        let mut new = sample_intent();
        new.requested_chain = if i % 2 == 0 { "base" } else { "arbitrum" }.into();
        ledger.create_intent(new).await?;
    }

    let page = ledger
        .list_intents(ListFilter {
            limit: 3,
            offset: 0,
            ..Default::default()
        })
        .await?;
    assert_eq!(page.items.len(), 3);
    assert_eq!(page.total, 7);

    let base_only = ledger
        .list_intents(ListFilter {
            chain: Some("base".into()),
            ..Default::default()
        })
        .await?;
    assert_eq!(base_only.total, 4);
    assert!(base_only.items.iter().all(|i| i.requested_chain == "base"));

    let tail = ledger
        .list_intents(ListFilter {
            limit: 3,
            offset: 6,
            ..Default::default()
        })
        .await?;
    assert_eq!(tail.items.len(), 1);
    assert_eq!(tail.total, 7);
    Ok(())
}

pub async fn execution_roundtrip_preserves_amounts_and_addresses(
    ledger: &dyn LedgerStore,
) -> Result<()> {
    let big = U256::from(10u64).pow(U256::from(30u64));

    let mut new = sample_execution(None);
    new.amount_in = Some(big);
    let created = ledger.create_execution(new).await?;

    let mut fetched = ledger.get_execution(&created.id).await?.unwrap();
    assert_eq!(fetched.amount_in, Some(big));
    assert_eq!(fetched.token_in, Some(Address::repeat_byte(0x11)));
    assert_eq!(fetched.session_id, Some(B256::repeat_byte(0xaa)));
    assert_eq!(fetched.status, ExecutionStatus::Pending);

    fetched.status = ExecutionStatus::Confirmed;
    fetched.tx_hash = Some(B256::repeat_byte(0x55));
    fetched.gas_used = Some(21_000);
    fetched.block_number = Some(19_000_001);
    fetched.latency_ms = Some(842);
    ledger.update_execution(&fetched).await?;

    let again = ledger.get_execution(&created.id).await?.unwrap();
    assert_eq!(again.status, ExecutionStatus::Confirmed);
    assert_eq!(again.tx_hash, Some(B256::repeat_byte(0x55)));
    assert_eq!(again.latency_ms, Some(842));
    Ok(())
}

pub async fn executions_filter_by_network_and_status(ledger: &dyn LedgerStore) -> Result<()> {
    for network in ["mainnet", "mainnet", "sepolia"] {
        let mut new = sample_execution(None);
        new.network = network.into();
        ledger.create_execution(new).await?;
    }

    let page = ledger
        .list_executions(ListFilter {
            chain: Some("base".into()),
            network: Some("mainnet".into()),
            status: Some("pending".into()),
            ..Default::default()
        })
        .await?;
    assert_eq!(page.total, 2);
    Ok(())
}

pub async fn finalize_execution_commits_both_rows(ledger: &dyn LedgerStore) -> Result<()> {
    let mut intent = ledger.create_intent(sample_intent()).await?;
    let now = now_unix();
    intent.transition(IntentStatus::Planned, now).unwrap();
    intent.transition(IntentStatus::Routed, now).unwrap();
    intent.transition(IntentStatus::Executing, now).unwrap();
    intent.transition(IntentStatus::Confirmed, now).unwrap();

    let mut new = sample_execution(Some(intent.id.clone()));
    new.status = ExecutionStatus::Confirmed;
    new.tx_hash = Some(B256::repeat_byte(0x99));
    let execution = ledger.finalize_execution(new, &intent).await?;

    let stored = ledger.get_execution(&execution.id).await?.unwrap();
    assert_eq!(stored.intent_id.as_deref(), Some(intent.id.as_str()));

    let stored_intent = ledger.get_intent(&intent.id).await?.unwrap();
    assert_eq!(stored_intent.status, IntentStatus::Confirmed);
    assert!(stored_intent.confirmed_at.is_some());

    let linked = ledger.executions_for_intent(&intent.id).await?;
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, execution.id);
    Ok(())
}

pub async fn finalize_execution_rolls_back_when_intent_is_missing(
    ledger: &dyn LedgerStore,
) -> Result<()> {
    let mut intent = ledger.create_intent(sample_intent()).await?;
    intent.id = "ghost".into();

    let err = ledger
        .finalize_execution(sample_execution(Some("ghost".into())), &intent)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { what: "intent", .. }));

    // the execution insert must not survive the failed transaction
    let page = ledger.list_executions(ListFilter::default()).await?;
    assert_eq!(page.total, 0);
    Ok(())
}

pub async fn steps_track_per_action_outcomes(ledger: &dyn LedgerStore) -> Result<()> {
    let execution = ledger.create_execution(sample_execution(None)).await?;

    for i in 0..3u32 {
        ledger
            .create_step(NewStep {
                execution_id: execution.id.clone(),
                step_index: i,
                action_type: 1,
                adapter: Address::repeat_byte(0x33),
            })
            .await?;
    }

    let steps = ledger.steps_for_execution(&execution.id).await?;
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    assert_eq!(steps[2].step_index, 2);

    ledger
        .update_step(&steps[1].id, StepStatus::Failed, Some("slippage".into()))
        .await?;
    let steps = ledger.steps_for_execution(&execution.id).await?;
    assert_eq!(steps[1].status, StepStatus::Failed);
    assert_eq!(steps[1].error_message.as_deref(), Some("slippage"));
    Ok(())
}

pub async fn position_create_is_idempotent_per_key(ledger: &dyn LedgerStore) -> Result<()> {
    let first = ledger.create_position_if_absent(sample_position(0x01)).await?;
    let mut dup = sample_position(0x01);
    dup.margin = U256::from(999u64);
    let second = ledger.create_position_if_absent(dup).await?;

    // the existing row wins, the duplicate insert is a no-op
    assert_eq!(first.id, second.id);
    assert_eq!(second.margin, U256::from(500u64));

    let page = ledger.list_positions(ListFilter::default()).await?;
    assert_eq!(page.total, 1);
    Ok(())
}

pub async fn close_position_only_fires_once(ledger: &dyn LedgerStore) -> Result<()> {
    let position = ledger.create_position_if_absent(sample_position(0x02)).await?;
    let key = PositionKey {
        chain: position.chain.clone(),
        network: position.network.clone(),
        venue: position.venue.clone(),
        on_chain_position_id: position.on_chain_position_id,
    };

    let closed = ledger
        .close_position(&key, PositionStatus::Closed, now_unix())
        .await?;
    assert!(closed);

    // replayed close event, and a liquidation arriving after the close
    let again = ledger
        .close_position(&key, PositionStatus::Closed, now_unix())
        .await?;
    assert!(!again);
    let liquidated = ledger
        .close_position(&key, PositionStatus::Liquidated, now_unix())
        .await?;
    assert!(!liquidated);

    let stored = ledger.position_by_key(&key).await?.unwrap();
    assert_eq!(stored.status, PositionStatus::Closed);
    assert!(stored.closed_at.is_some());
    Ok(())
}

pub async fn session_cache_overwrites_on_refresh(ledger: &dyn LedgerStore) -> Result<()> {
    let mut session = Session {
        id: B256::repeat_byte(0x0a),
        owner: Address::repeat_byte(0x01),
        executor: Address::repeat_byte(0x02),
        expires_at: now_unix() + 3600,
        max_spend: U256::from(10u64).pow(U256::from(18u64)),
        spent: U256::ZERO,
        allowed_adapters: vec![Address::repeat_byte(0x33)],
        active: true,
    };
    ledger.cache_session(&session, now_unix()).await?;

    let cached = ledger.cached_session(session.id).await?.unwrap();
    assert_eq!(cached.owner, session.owner);
    assert_eq!(cached.allowed_adapters, session.allowed_adapters);
    assert!(cached.active);

    session.spent = U256::from(42u64);
    session.active = false;
    ledger.cache_session(&session, now_unix()).await?;
    let cached = ledger.cached_session(session.id).await?.unwrap();
    assert_eq!(cached.spent, U256::from(42u64));
    assert!(!cached.active);

    assert!(ledger.cached_session(B256::repeat_byte(0xff)).await?.is_none());
    Ok(())
}

pub async fn indexer_cursor_upserts(ledger: &dyn LedgerStore) -> Result<()> {
    let contract = Address::repeat_byte(0x44);

    assert!(ledger.indexer_cursor("base", "mainnet", contract).await?.is_none());

    let mut cursor = IndexerCursor {
        chain: "base".into(),
        network: "mainnet".into(),
        contract_address: contract,
        last_indexed_block: 100,
    };
    ledger.upsert_indexer_cursor(&cursor).await?;
    assert_eq!(
        ledger.indexer_cursor("base", "mainnet", contract).await?,
        Some(100)
    );

    cursor.last_indexed_block = 250;
    ledger.upsert_indexer_cursor(&cursor).await?;
    assert_eq!(
        ledger.indexer_cursor("base", "mainnet", contract).await?,
        Some(250)
    );
    Ok(())
}
