//! Composition root: builds every component once from configuration and
//! hands out one context instance with an explicit init/close lifecycle.
//! Nothing in the crate resolves a singleton lazily.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::info;

use blossom_chain::{ChainClient, Health, HttpChainClient, ReceiptWatcher, RpcClient, TxSigner};
use blossom_ledger::{DynLedger, PgLedger, SqliteLedger};

use crate::config::{LedgerConfig, RelayerConfig};
use crate::error::RelayerResult;
use crate::indexer::PositionIndexer;
use crate::intents::{IntentController, IntentPlanner};
use crate::orchestrator::Orchestrator;
use crate::policy::PolicyLimits;

pub struct RelayerContext {
    pub config: RelayerConfig,
    pub client: Arc<dyn ChainClient>,
    pub ledger: DynLedger,
    pub orchestrator: Arc<Orchestrator>,
    pub intents: IntentController,
    pub indexer: Arc<PositionIndexer>,
    indexer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RelayerContext {
    /// Build the production context: JSON-RPC client with the relayer key,
    /// the configured ledger backend, and the components wired on top.
    pub async fn init(
        config: RelayerConfig,
        planner: Arc<dyn IntentPlanner>,
    ) -> RelayerResult<Self> {
        let signer = TxSigner::from_hex(&config.relayer_key, config.chain_id)?;
        let rpc = RpcClient::new(config.rpc_url.clone())?;
        let client: Arc<dyn ChainClient> = Arc::new(HttpChainClient::new(rpc, signer));

        let ledger: DynLedger = match &config.ledger {
            LedgerConfig::Sqlite { path } => Arc::new(SqliteLedger::open(path)?),
            LedgerConfig::Postgres { url } => Arc::new(PgLedger::connect(url).await?),
        };

        info!(chain = %config.chain, network = %config.network, router = %config.router_address, "relayer context initialized");
        Ok(Self::with_parts(config, client, ledger, planner))
    }

    /// Assemble from pre-built parts. Tests inject a mock chain client and
    /// an in-memory ledger here.
    pub fn with_parts(
        config: RelayerConfig,
        client: Arc<dyn ChainClient>,
        ledger: DynLedger,
        planner: Arc<dyn IntentPlanner>,
    ) -> Self {
        let watcher = ReceiptWatcher::new(config.receipt_poll, config.receipt_timeout);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&client),
            config.router_address,
            Arc::clone(&ledger),
            watcher,
            PolicyLimits::from_config(&config),
            config.chain.clone(),
            config.network.clone(),
            config.venue.clone(),
        ));
        let intents = IntentController::new(
            Arc::clone(&ledger),
            Arc::clone(&orchestrator),
            planner,
            config.chain.clone(),
        );
        let indexer = Arc::new(PositionIndexer::new(
            Arc::clone(&client),
            Arc::clone(&ledger),
            config.chain.clone(),
            config.network.clone(),
            config.venue.clone(),
            config.router_address,
            config.indexer_start_block,
            config.indexer_poll,
        ));
        Self {
            config,
            client,
            ledger,
            orchestrator,
            intents,
            indexer,
            indexer_handle: Mutex::new(None),
        }
    }

    /// Start the background position indexer. A second call while it runs
    /// is a no-op.
    pub fn start_indexer(&self) {
        if let Some(handle) = self.indexer.start() {
            *self.indexer_handle.lock().unwrap() = Some(handle);
        }
    }

    pub async fn health(&self) -> Health {
        self.client.health_check().await
    }

    /// Stop background work and wait for it to wind down.
    pub async fn close(&self) {
        self.indexer.stop();
        let handle = self.indexer_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
