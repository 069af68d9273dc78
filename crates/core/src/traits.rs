//! Abstract capability sets. Concrete providers live in
//! `crates/repository`, `crates/chain`, `crates/queue`; tests substitute
//! in-memory fakes that also live alongside those crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ChainError, DispatchError, QueueError, RepoError};
use crate::event::{BridgeTask, Event};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_event(&self, event: &Event) -> Result<(), RepoError>;
    async fn get_event(&self, id: &str) -> Result<Event, RepoError>;
    async fn get_events(&self) -> Result<Vec<Event>, RepoError>;
    async fn delete_event(&self, id: &str) -> Result<(), RepoError>;

    async fn save_bridge_task(&self, task: &BridgeTask) -> Result<(), RepoError>;
    async fn get_bridge_task(&self, id: &str) -> Result<BridgeTask, RepoError>;
    async fn get_bridge_tasks(&self) -> Result<Vec<BridgeTask>, RepoError>;

    async fn set_last_scanned_block(&self, chain_id: u64, block_number: u64) -> Result<(), RepoError>;
    async fn get_last_scanned_block(&self, chain_id: u64) -> Result<u64, RepoError>;

    /// `get_event(e.id()) == e`, treating `RepoError::Get` as `false`.
    async fn is_event_stored(&self, event: &Event) -> bool {
        match self.get_event(&event.id()).await {
            Ok(stored) => stored == *event,
            Err(_) => false,
        }
    }

    /// As `is_event_stored`, additionally requiring `handled == "registered"`.
    async fn is_event_registered(&self, event: &Event) -> bool {
        match self.get_event(&event.id()).await {
            Ok(stored) => stored.id() == event.id() && stored.is_registered(),
            Err(_) => false,
        }
    }

    async fn set_event_as_registered(&self, event: &mut Event) -> Result<(), RepoError> {
        event.mark_registered();
        self.save_event(event).await
    }

    /// Saves only if not already stored; returns whether it was new.
    async fn store_event(&self, event: &Event) -> Result<bool, RepoError> {
        if self.is_event_stored(event).await {
            return Ok(false);
        }
        self.save_event(event).await?;
        Ok(true)
    }
}

/// A decoded log row, independent of which JSON-RPC client produced it.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: Option<u64>,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn current_block_number(&self) -> Result<u64, ChainError>;
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>, ChainError>;
    async fn get_logs(
        &self,
        address: &str,
        topics: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;
    async fn account_address(&self) -> Result<String, ChainError>;
    async fn transaction_count(&self, address: &str) -> Result<u64, ChainError>;
    async fn client_version(&self) -> Result<String, ChainError>;
}

#[derive(Debug, Clone)]
pub struct TxResult {
    pub tx_hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub status: u64,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Build + sign + send + wait for receipt.
    async fn execute(
        &self,
        chain_id: u64,
        operation_hash: [u8; 32],
        func_name: &str,
        params: serde_json::Value,
        block_step: u64,
    ) -> Result<TxResult, DispatchError>;
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn register_event(&self, bytes: Vec<u8>) -> Result<(), QueueError>;

    /// Long-running: invokes `callback` for each message. The callback
    /// returning `Ok` acks; `Err` leaves the message un-acked for redelivery.
    async fn read_events(
        &self,
        callback: Box<dyn Fn(Vec<u8>) -> futures::future::BoxFuture<'static, anyhow::Result<()>> + Send + Sync>,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<(), QueueError>;
}
