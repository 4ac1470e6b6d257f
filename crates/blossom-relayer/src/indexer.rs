//! Position indexer: reconciles Position rows with on-chain lifecycle
//! events, independent of the orchestrator's own writes. If the
//! orchestrator's position write is lost, the next poll heals it.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy_primitives::Address;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use blossom_chain::{ChainClient, PositionEvent, decode_position_event};
use blossom_ledger::{DynLedger, LedgerResult, NewPosition};
use blossom_types::{IndexerCursor, PositionKey, PositionStatus, now_unix};

use crate::error::RelayerResult;

/// Widest log window fetched per poll; keeps `eth_getLogs` under provider
/// range caps while catching up after downtime.
pub const MAX_BLOCKS_PER_POLL: u64 = 5_000;
/// Consecutive poll failures log at most this often.
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Fold one router event into the ledger.
///
/// Opens are create-if-absent keyed by (chain, network, venue,
/// on_chain_position_id); closes and liquidations are idempotent no-ops
/// once the row left `open`. Safe to replay across overlapping windows.
pub(crate) async fn apply_position_event(
    ledger: &DynLedger,
    chain: &str,
    network: &str,
    venue: &str,
    event: &PositionEvent,
    intent_id: Option<String>,
    execution_id: Option<String>,
) -> LedgerResult<()> {
    match event {
        PositionEvent::Opened {
            position_id,
            user,
            side,
            margin,
            size,
            entry_price,
        } => {
            let position = ledger
                .create_position_if_absent(NewPosition {
                    chain: chain.to_string(),
                    network: network.to_string(),
                    venue: venue.to_string(),
                    // the event does not carry a market label
                    market: "unknown".to_string(),
                    side: *side,
                    leverage: None,
                    margin: *margin,
                    size: *size,
                    entry_price: *entry_price,
                    on_chain_position_id: *position_id,
                    intent_id,
                    execution_id,
                })
                .await?;
            debug!(position_id = %position_id, user = %user, id = %position.id, "position open observed");
        }
        PositionEvent::Closed { position_id } => {
            let key = position_key(chain, network, venue, *position_id);
            let changed = ledger
                .close_position(&key, PositionStatus::Closed, now_unix())
                .await?;
            if !changed {
                debug!(position_id = %position_id, "close event for already non-open position");
            }
        }
        PositionEvent::Liquidated { position_id } => {
            let key = position_key(chain, network, venue, *position_id);
            let changed = ledger
                .close_position(&key, PositionStatus::Liquidated, now_unix())
                .await?;
            if !changed {
                debug!(position_id = %position_id, "liquidation event for already non-open position");
            }
        }
    }
    Ok(())
}

fn position_key(
    chain: &str,
    network: &str,
    venue: &str,
    position_id: alloy_primitives::B256,
) -> PositionKey {
    PositionKey {
        chain: chain.to_string(),
        network: network.to_string(),
        venue: venue.to_string(),
        on_chain_position_id: position_id,
    }
}

/// Singleton poll loop over the router's event log.
pub struct PositionIndexer {
    client: Arc<dyn ChainClient>,
    ledger: DynLedger,
    chain: String,
    network: String,
    venue: String,
    contract: Address,
    /// Cursor used before any row exists; a fresh deployment reads from
    /// `start_block + 1` instead of replaying from genesis.
    start_block: u64,
    poll_interval: Duration,
    running: AtomicBool,
    stopping: AtomicBool,
    last_failure_log: Mutex<Option<Instant>>,
}

impl PositionIndexer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        ledger: DynLedger,
        chain: impl Into<String>,
        network: impl Into<String>,
        venue: impl Into<String>,
        contract: Address,
        start_block: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            ledger,
            chain: chain.into(),
            network: network.into(),
            venue: venue.into(),
            contract,
            start_block,
            poll_interval,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            last_failure_log: Mutex::new(None),
        }
    }

    /// Spawn the poll loop. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(contract = %self.contract, "position indexer already running, ignoring start");
            return None;
        }
        self.stopping.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!(contract = %this.contract, chain = %this.chain, "position indexer started");
            while !this.stopping.load(Ordering::SeqCst) {
                match this.poll_once().await {
                    Ok(processed) => {
                        *this.last_failure_log.lock().unwrap() = None;
                        if processed > 0 {
                            debug!(processed, "indexed position events");
                        }
                    }
                    Err(err) => this.log_failure(&err),
                }
                tokio::time::sleep(this.poll_interval).await;
            }
            this.running.store(false, Ordering::SeqCst);
            info!(contract = %this.contract, "position indexer stopped");
        }))
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One poll: fetch the next block window, fold its events into the
    /// ledger, then advance the cursor. A failed poll leaves the cursor
    /// untouched, so the window is retried on the next tick.
    pub async fn poll_once(&self) -> RelayerResult<usize> {
        let cursor = self
            .ledger
            .indexer_cursor(&self.chain, &self.network, self.contract)
            .await?
            .unwrap_or(self.start_block);
        let current = self.client.block_number().await?;
        let from = cursor + 1;
        let to = current.min(cursor + MAX_BLOCKS_PER_POLL);
        if from > to {
            return Ok(0);
        }

        let mut logs = self.client.get_logs(self.contract, from, to).await?;
        logs.sort_by_key(|l| (l.block_number, l.log_index));

        let mut processed = 0;
        for log in &logs {
            if let Some(event) = decode_position_event(log)? {
                apply_position_event(
                    &self.ledger,
                    &self.chain,
                    &self.network,
                    &self.venue,
                    &event,
                    None,
                    None,
                )
                .await?;
                processed += 1;
            }
        }

        // only a fully processed window advances the cursor
        self.ledger
            .upsert_indexer_cursor(&IndexerCursor {
                chain: self.chain.clone(),
                network: self.network.clone(),
                contract_address: self.contract,
                last_indexed_block: to,
            })
            .await?;
        Ok(processed)
    }

    fn log_failure(&self, err: &crate::error::RelayerError) {
        let mut last = self.last_failure_log.lock().unwrap();
        let due = last.map_or(true, |at| at.elapsed() >= FAILURE_LOG_INTERVAL);
        if due {
            warn!(%err, contract = %self.contract, "position indexer poll failed, will retry");
            *last = Some(Instant::now());
        }
    }
}
