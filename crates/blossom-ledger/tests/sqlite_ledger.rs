mod common;

use anyhow::Result;

use blossom_ledger::{LedgerStore, SqliteLedger};
use blossom_types::IntentStatus;

macro_rules! sqlite_case {
    ($name:ident) => {
        #[tokio::test]
        async fn $name() -> Result<()> {
            let ledger = SqliteLedger::in_memory()?;
            common::$name(&ledger).await
        }
    };
}

sqlite_case!(intent_roundtrip_and_update);
sqlite_case!(update_missing_intent_is_not_found);
sqlite_case!(list_intents_pages_and_reports_total);
sqlite_case!(execution_roundtrip_preserves_amounts_and_addresses);
sqlite_case!(executions_filter_by_network_and_status);
sqlite_case!(finalize_execution_commits_both_rows);
sqlite_case!(finalize_execution_rolls_back_when_intent_is_missing);
sqlite_case!(steps_track_per_action_outcomes);
sqlite_case!(position_create_is_idempotent_per_key);
sqlite_case!(close_position_only_fires_once);
sqlite_case!(session_cache_overwrites_on_refresh);
sqlite_case!(indexer_cursor_upserts);

#[tokio::test]
async fn reopening_a_file_database_is_a_no_op() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ledger.db");

    let intent_id = {
        let ledger = SqliteLedger::open(&path)?;
        ledger.create_intent(common::sample_intent()).await?.id
    };

    // second open re-runs the full bootstrap against existing tables
    let ledger = SqliteLedger::open(&path)?;
    let intent = ledger.get_intent(&intent_id).await?.unwrap();
    assert_eq!(intent.kind, "perp_open");
    assert_eq!(intent.status, IntentStatus::Queued);
    Ok(())
}
