//! Domain entities: `Event`, `EventPayload`, `BridgeTask`.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConsumerError;

/// Closed set of bridge event names (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventName {
    OperationCreated,
    FeesDeposited,
    FeesDepositConfirmed,
    FeesLockedConfirmed,
    FeesLockedAndDepositConfirmed,
    OperationFinalized,
}

impl EventName {
    pub const ALL: [EventName; 6] = [
        EventName::OperationCreated,
        EventName::FeesDeposited,
        EventName::FeesDepositConfirmed,
        EventName::FeesLockedConfirmed,
        EventName::FeesLockedAndDepositConfirmed,
        EventName::OperationFinalized,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EventName::OperationCreated => "OperationCreated",
            EventName::FeesDeposited => "FeesDeposited",
            EventName::FeesDepositConfirmed => "FeesDepositConfirmed",
            EventName::FeesLockedConfirmed => "FeesLockedConfirmed",
            EventName::FeesLockedAndDepositConfirmed => "FeesLockedAndDepositConfirmed",
            EventName::OperationFinalized => "OperationFinalized",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConsumerError::EventConverterTypeError(format!("unknown event name: {s}")))
    }
}

/// Which side of `EventPayload` names a chain (GLOSSARY: origin / target chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSide {
    ChainIdFrom,
    ChainIdTo,
}

impl ChainSide {
    pub fn resolve(self, payload: &EventPayload) -> u64 {
        match self {
            ChainSide::ChainIdFrom => payload.chain_id_from,
            ChainSide::ChainIdTo => payload.chain_id_to,
        }
    }
}

impl FromStr for ChainSide {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chainIdFrom" => Ok(ChainSide::ChainIdFrom),
            "chainIdTo" => Ok(ChainSide::ChainIdTo),
            other => Err(ConsumerError::EventConverterTypeError(format!(
                "invalid chain side: {other}"
            ))),
        }
    }
}

/// Value type embedded in `Event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub from: Address,
    pub to: Address,
    pub chain_id_from: u64,
    pub chain_id_to: u64,
    pub token_name: String,
    pub amount: U256,
    pub nonce: u64,
    pub signature_bytes: Vec<u8>,
    pub signature_hex: String,
    pub operation_hash_bytes: [u8; 32],
    pub operation_hash_hex: String,
    pub block_step: u64,
}

impl EventPayload {
    pub fn new(
        from: Address,
        to: Address,
        chain_id_from: u64,
        chain_id_to: u64,
        token_name: String,
        amount: U256,
        nonce: u64,
        signature_bytes: Vec<u8>,
        operation_hash_bytes: [u8; 32],
        block_step: u64,
    ) -> Self {
        let signature_hex = format!("0x{}", hex::encode(&signature_bytes));
        let operation_hash_hex = format!("0x{}", hex::encode(operation_hash_bytes));
        Self {
            from,
            to,
            chain_id_from,
            chain_id_to,
            token_name,
            amount,
            nonce,
            signature_bytes,
            signature_hex,
            operation_hash_bytes,
            operation_hash_hex,
            block_step,
        }
    }
}

/// Persisted event, keyed by `(block_number, tx_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub chain_id: u64,
    pub event_name: EventName,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_datetime: DateTime<Utc>,
    pub handled: Option<String>,
    pub data: EventPayload,
}

pub const HANDLED_REGISTERED: &str = "registered";

impl Event {
    /// Composite key: `(block_number, tx_hash, log_index)`.
    pub fn id(&self) -> String {
        format!("{}-{}-{}", self.block_number, self.tx_hash, self.log_index)
    }

    pub fn is_registered(&self) -> bool {
        self.handled.as_deref() == Some(HANDLED_REGISTERED)
    }

    pub fn mark_registered(&mut self) {
        self.handled = Some(HANDLED_REGISTERED.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable progress record for one `(operation_hash, event_name)` pair,
/// secondary-keyed by `(block_number, tx_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTask {
    pub chain_id: u64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub operation_hash: String,
    pub event_name: EventName,
    pub status: TaskStatus,
    pub datetime: DateTime<Utc>,
}

impl BridgeTask {
    /// Primary key: `(operation_hash, event_name)`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.operation_hash, self.event_name)
    }

    /// Secondary id: `(block_number, tx_hash, log_index)`.
    pub fn secondary_id(&self) -> String {
        format!("{}-{}-{}", self.block_number, self.tx_hash, self.log_index)
    }

    pub fn new_processing(event: &Event) -> Self {
        Self {
            chain_id: event.chain_id,
            block_number: event.block_number,
            tx_hash: event.tx_hash.clone(),
            log_index: event.log_index,
            operation_hash: event.data.operation_hash_hex.clone(),
            event_name: event.event_name,
            status: TaskStatus::Processing,
            datetime: Utc::now(),
        }
    }
}
