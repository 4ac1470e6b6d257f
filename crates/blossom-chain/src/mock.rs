//! Scripted [`ChainClient`] for tests in this crate and its dependents.
//!
//! Mirrors the router's observable behavior: session getters answered from
//! an in-memory map, receipts popped from a script, logs filtered by block
//! window, and submissions recorded for assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::abi;
use crate::client::{ChainClient, Health, LogEntry, TxReceipt};
use crate::error::{ChainError, ChainResult};
use crate::router::SessionWords;

enum ScriptedReceipt {
    Receipt(Option<TxReceipt>),
    Error(String),
}

/// Recorded `send_transaction` invocation.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<B256, SessionWords>,
    allowed_adapters: HashSet<Address>,
    receipt_script: VecDeque<ScriptedReceipt>,
    send_errors: VecDeque<String>,
    logs: Vec<LogEntry>,
    get_logs_errors: VecDeque<String>,
    submitted: Vec<SubmittedTx>,
}

pub struct MockChainClient {
    state: Mutex<MockState>,
    block_number: AtomicU64,
    receipt_polls: AtomicU64,
    next_tx: AtomicU64,
    relayer: Address,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            block_number: AtomicU64::new(1),
            receipt_polls: AtomicU64::new(0),
            next_tx: AtomicU64::new(1),
            relayer: Address::repeat_byte(0x7e),
        }
    }

    pub fn set_session(&self, id: B256, words: SessionWords) {
        self.state.lock().unwrap().sessions.insert(id, words);
    }

    pub fn allow_adapter(&self, adapter: Address) {
        self.state.lock().unwrap().allowed_adapters.insert(adapter);
    }

    /// Queue the next receipt poll answer. Once the script is exhausted
    /// the mock answers `None` (still pending).
    pub fn push_receipt(&self, receipt: Option<TxReceipt>) {
        self.state
            .lock()
            .unwrap()
            .receipt_script
            .push_back(ScriptedReceipt::Receipt(receipt));
    }

    pub fn push_receipt_error(&self, message: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .receipt_script
            .push_back(ScriptedReceipt::Error(message.into()));
    }

    /// Make the next `send_transaction` fail with an RPC error message.
    pub fn fail_next_send(&self, message: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .send_errors
            .push_back(message.into());
    }

    pub fn push_log(&self, log: LogEntry) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn fail_next_get_logs(&self, message: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .get_logs_errors
            .push_back(message.into());
    }

    pub fn set_block_number(&self, n: u64) {
        self.block_number.store(n, Ordering::SeqCst);
    }

    pub fn receipt_polls(&self) -> u64 {
        self.receipt_polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state.lock().unwrap().submitted.clone()
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn call(&self, _to: Address, data: Vec<u8>) -> ChainResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if data.len() >= 4 && data[..4] == abi::selector(abi::SESSIONS_SIG) {
            let id = B256::from_slice(&data[4..36]);
            let words = state.sessions.get(&id).copied().unwrap_or(SessionWords {
                owner: Address::ZERO,
                executor: Address::ZERO,
                expires_at: 0,
                max_spend: U256::ZERO,
                spent: U256::ZERO,
                active: false,
            });
            let mut out = Vec::with_capacity(192);
            out.extend_from_slice(&B256::left_padding_from(words.owner.as_slice()).0);
            out.extend_from_slice(&B256::left_padding_from(words.executor.as_slice()).0);
            out.extend_from_slice(&U256::from(words.expires_at).to_be_bytes::<32>());
            out.extend_from_slice(&words.max_spend.to_be_bytes::<32>());
            out.extend_from_slice(&words.spent.to_be_bytes::<32>());
            out.extend_from_slice(&U256::from(u8::from(words.active)).to_be_bytes::<32>());
            return Ok(out);
        }
        if data.len() >= 4 && data[..4] == abi::selector(abi::IS_ADAPTER_ALLOWED_SIG) {
            let adapter = Address::from_slice(&data[16..36]);
            let allowed = state.allowed_adapters.contains(&adapter);
            return Ok(U256::from(u8::from(allowed)).to_be_bytes::<32>().to_vec());
        }
        Err(ChainError::Abi("mock: unknown call selector".into()))
    }

    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.block_number.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, address: Address, from: u64, to: u64) -> ChainResult<Vec<LogEntry>> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.get_logs_errors.pop_front() {
            return Err(ChainError::Rpc {
                code: -32000,
                message,
            });
        }
        let mut matching: Vec<LogEntry> = state
            .logs
            .iter()
            .filter(|l| l.address == address && l.block_number >= from && l.block_number <= to)
            .cloned()
            .collect();
        matching.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(matching)
    }

    async fn get_transaction_receipt(&self, _tx_hash: B256) -> ChainResult<Option<TxReceipt>> {
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        match state.receipt_script.pop_front() {
            Some(ScriptedReceipt::Receipt(r)) => Ok(r),
            Some(ScriptedReceipt::Error(message)) => Err(ChainError::Rpc {
                code: -32000,
                message,
            }),
            None => Ok(None),
        }
    }

    async fn send_transaction(&self, to: Address, data: Vec<u8>, value: U256) -> ChainResult<B256> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.send_errors.pop_front() {
            return Err(ChainError::Rpc { code: 3, message });
        }
        state.submitted.push(SubmittedTx { to, data, value });
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        Ok(B256::from(U256::from(n).to_be_bytes::<32>()))
    }

    fn relayer_address(&self) -> Address {
        self.relayer
    }

    async fn health_check(&self) -> Health {
        Health::Ok
    }
}
