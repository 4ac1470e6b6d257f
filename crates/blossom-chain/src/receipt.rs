//! Receipt confirmation state machine: `pending` until the chain answers,
//! then exactly one of `confirmed`, `failed` or `timeout`.

use std::time::Duration;

use alloy_primitives::B256;
use tracing::debug;

use crate::client::ChainClient;

/// Terminal outcome of watching one transaction.
///
/// `Timeout` is indeterminate: the transaction may still land later. It
/// must never be treated as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Confirmed { block_number: u64, gas_used: u64 },
    Failed { block_number: u64 },
    Timeout,
}

/// Polls `eth_getTransactionReceipt` at a fixed interval until the
/// transaction resolves or the window elapses.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptWatcher {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReceiptWatcher {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ReceiptWatcher {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Drive the watcher to a terminal state.
    ///
    /// A transport error counts as a `null` tick: no retry beyond the
    /// natural next poll, and a persistently failing endpoint only
    /// surfaces once the timeout window elapses.
    pub async fn wait(&self, client: &dyn ChainClient, tx_hash: B256) -> ReceiptOutcome {
        let started = tokio::time::Instant::now();
        loop {
            match client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    return ReceiptOutcome::Confirmed {
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    };
                }
                Ok(Some(receipt)) => {
                    return ReceiptOutcome::Failed {
                        block_number: receipt.block_number,
                    };
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(%tx_hash, %err, "receipt poll failed, will retry next tick");
                }
            }
            if started.elapsed() >= self.timeout {
                return ReceiptOutcome::Timeout;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
