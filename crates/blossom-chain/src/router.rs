//! Typed binding for the session-router contract: session reads, adapter
//! allowlist checks, relayed plan execution and position lifecycle events.

use std::sync::Arc;

use alloy_primitives::{Address, B256, keccak256};
use once_cell::sync::Lazy;

use blossom_types::{ActionPlan, PositionSide, Session, SessionId, U256};

use crate::abi;
use crate::client::{ChainClient, LogEntry};
use crate::error::{ChainError, ChainResult};

static POSITION_OPENED_TOPIC: Lazy<B256> = Lazy::new(|| {
    keccak256("PositionOpened(bytes32,address,uint8,uint256,uint256,uint256)".as_bytes())
});
static POSITION_CLOSED_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("PositionClosed(bytes32)".as_bytes()));
static POSITION_LIQUIDATED_TOPIC: Lazy<B256> =
    Lazy::new(|| keccak256("PositionLiquidated(bytes32)".as_bytes()));

/// Decoded return of the `sessions(bytes32)` getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWords {
    pub owner: Address,
    pub executor: Address,
    pub expires_at: u64,
    pub max_spend: U256,
    pub spent: U256,
    pub active: bool,
}

impl SessionWords {
    pub fn decode(data: &[u8]) -> ChainResult<Self> {
        Ok(Self {
            owner: abi::decode_address(abi::read_word(data, 0)?),
            executor: abi::decode_address(abi::read_word(data, 1)?),
            expires_at: abi::decode_u64(abi::read_word(data, 2)?, "session expiresAt")?,
            max_spend: abi::decode_u256(abi::read_word(data, 3)?),
            spent: abi::decode_u256(abi::read_word(data, 4)?),
            active: abi::read_word(data, 5)?[31] != 0,
        })
    }

    /// Project into the shared [`Session`] model. The getter does not
    /// expose the adapter allowlist; callers query `isAdapterAllowed`
    /// per adapter or carry a configured allowlist.
    pub fn into_session(self, id: SessionId) -> Session {
        Session {
            id,
            owner: self.owner,
            executor: self.executor,
            expires_at: self.expires_at,
            max_spend: self.max_spend,
            spent: self.spent,
            allowed_adapters: Vec::new(),
            active: self.active,
        }
    }
}

/// A position lifecycle event emitted by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionEvent {
    Opened {
        position_id: B256,
        user: Address,
        side: PositionSide,
        margin: U256,
        size: U256,
        entry_price: U256,
    },
    Closed {
        position_id: B256,
    },
    Liquidated {
        position_id: B256,
    },
}

/// Decode a router log into a [`PositionEvent`]. Logs with foreign topics
/// return `None` so the indexer can skip them without error.
pub fn decode_position_event(log: &LogEntry) -> ChainResult<Option<PositionEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let position_id = |log: &LogEntry| -> ChainResult<B256> {
        log.topics
            .get(1)
            .copied()
            .ok_or_else(|| ChainError::Abi("position event missing positionId topic".into()))
    };
    if *topic0 == *POSITION_OPENED_TOPIC {
        let user_topic = log
            .topics
            .get(2)
            .ok_or_else(|| ChainError::Abi("PositionOpened missing user topic".into()))?;
        let side_word = abi::read_word(&log.data, 0)?;
        Ok(Some(PositionEvent::Opened {
            position_id: position_id(log)?,
            user: Address::from_slice(&user_topic[12..]),
            side: PositionSide::from_event_code(side_word[31]),
            margin: abi::decode_u256(abi::read_word(&log.data, 1)?),
            size: abi::decode_u256(abi::read_word(&log.data, 2)?),
            entry_price: abi::decode_u256(abi::read_word(&log.data, 3)?),
        }))
    } else if *topic0 == *POSITION_CLOSED_TOPIC {
        Ok(Some(PositionEvent::Closed {
            position_id: position_id(log)?,
        }))
    } else if *topic0 == *POSITION_LIQUIDATED_TOPIC {
        Ok(Some(PositionEvent::Liquidated {
            position_id: position_id(log)?,
        }))
    } else {
        Ok(None)
    }
}

/// Topic hash for `PositionOpened`, exported for mocks and tests.
pub fn position_opened_topic() -> B256 {
    *POSITION_OPENED_TOPIC
}

pub fn position_closed_topic() -> B256 {
    *POSITION_CLOSED_TOPIC
}

pub fn position_liquidated_topic() -> B256 {
    *POSITION_LIQUIDATED_TOPIC
}

/// Contract handle bound to one router address on one network.
pub struct SessionRouter {
    address: Address,
    client: Arc<dyn ChainClient>,
}

impl SessionRouter {
    pub fn new(address: Address, client: Arc<dyn ChainClient>) -> Self {
        Self { address, client }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Read a session from the chain. A zeroed owner means the id has
    /// never been created.
    pub async fn session(&self, id: SessionId) -> ChainResult<Option<Session>> {
        let data = self
            .client
            .call(self.address, abi::encode_sessions(id))
            .await?;
        let words = SessionWords::decode(&data)?;
        if words.owner == Address::ZERO {
            return Ok(None);
        }
        Ok(Some(words.into_session(id)))
    }

    pub async fn is_adapter_allowed(&self, adapter: Address) -> ChainResult<bool> {
        let data = self
            .client
            .call(self.address, abi::encode_is_adapter_allowed(adapter))
            .await?;
        abi::decode_bool(&data)
    }

    /// Submit `executeWithSession` with the plan's total native value
    /// attached. Returns the transaction hash.
    pub async fn execute_with_session(
        &self,
        session_id: SessionId,
        plan: &ActionPlan,
    ) -> ChainResult<B256> {
        let calldata = abi::encode_execute_with_session(session_id, plan);
        self.client
            .send_transaction(self.address, calldata, plan.total_value())
            .await
    }
}
