use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
            PositionStatus::Liquidated => "liquidated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PositionStatus::Open),
            "closed" => Some(PositionStatus::Closed),
            "liquidated" => Some(PositionStatus::Liquidated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// Side as emitted by the router's `PositionOpened` event.
    pub fn from_event_code(code: u8) -> Self {
        if code == 0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        }
    }
}

/// Uniqueness key for a position row.
///
/// Either the orchestrator or the indexer may observe an open first; both
/// create through this key so the row exists exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub chain: String,
    pub network: String,
    pub venue: String,
    pub on_chain_position_id: B256,
}

/// A derived on-chain position reconciled from router events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub chain: String,
    pub network: String,
    pub venue: String,
    pub market: String,
    pub side: PositionSide,
    pub leverage: Option<f64>,
    pub margin: U256,
    pub size: U256,
    pub entry_price: U256,
    pub status: PositionStatus,
    pub opened_at: u64,
    pub closed_at: Option<u64>,
    pub on_chain_position_id: B256,
    pub intent_id: Option<String>,
    pub execution_id: Option<String>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey {
            chain: self.chain.clone(),
            network: self.network.clone(),
            venue: self.venue.clone(),
            on_chain_position_id: self.on_chain_position_id,
        }
    }
}
