use async_trait::async_trait;
use relayer_core::error::RepoError;
use relayer_core::event::{BridgeTask, Event};
use relayer_core::traits::Repository;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process fake used by tests in place of `PostgresRepository`.
#[derive(Default)]
pub struct InMemoryRepository {
    events: RwLock<HashMap<String, Event>>,
    bridge_tasks: RwLock<HashMap<String, BridgeTask>>,
    last_scanned: RwLock<HashMap<u64, u64>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_event(&self, event: &Event) -> Result<(), RepoError> {
        self.events.write().await.insert(event.id(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Event, RepoError> {
        self.events
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::Get(format!("event not found: {id}")))
    }

    async fn get_events(&self) -> Result<Vec<Event>, RepoError> {
        Ok(self.events.read().await.values().cloned().collect())
    }

    async fn delete_event(&self, id: &str) -> Result<(), RepoError> {
        self.events.write().await.remove(id);
        Ok(())
    }

    async fn save_bridge_task(&self, task: &BridgeTask) -> Result<(), RepoError> {
        self.bridge_tasks.write().await.insert(task.id(), task.clone());
        Ok(())
    }

    async fn get_bridge_task(&self, id: &str) -> Result<BridgeTask, RepoError> {
        self.bridge_tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::Get(format!("bridge task not found: {id}")))
    }

    async fn get_bridge_tasks(&self) -> Result<Vec<BridgeTask>, RepoError> {
        Ok(self.bridge_tasks.read().await.values().cloned().collect())
    }

    async fn set_last_scanned_block(&self, chain_id: u64, block_number: u64) -> Result<(), RepoError> {
        self.last_scanned.write().await.insert(chain_id, block_number);
        Ok(())
    }

    async fn get_last_scanned_block(&self, chain_id: u64) -> Result<u64, RepoError> {
        Ok(*self.last_scanned.read().await.get(&chain_id).unwrap_or(&0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use chrono::Utc;
    use relayer_core::event::{EventName, EventPayload};

    fn sample_event() -> Event {
        Event {
            chain_id: 440,
            event_name: EventName::FeesDeposited,
            block_number: 10,
            tx_hash: "0xabc".into(),
            log_index: 0,
            block_datetime: Utc::now(),
            handled: None,
            data: EventPayload::new(
                Address::ZERO,
                Address::ZERO,
                1337,
                440,
                "ethereum".into(),
                U256::from(1u64),
                1,
                vec![0; 65],
                [2u8; 32],
                10,
            ),
        }
    }

    #[tokio::test]
    async fn store_event_is_idempotent_on_retry() {
        let repo = InMemoryRepository::new();
        let event = sample_event();
        assert!(repo.store_event(&event).await.unwrap());
        assert!(!repo.store_event(&event).await.unwrap());
        assert!(repo.is_event_stored(&event).await);
    }

    #[tokio::test]
    async fn set_event_as_registered_round_trips() {
        let repo = InMemoryRepository::new();
        let mut event = sample_event();
        repo.save_event(&event).await.unwrap();
        assert!(!repo.is_event_registered(&event).await);
        repo.set_event_as_registered(&mut event).await.unwrap();
        assert!(repo.is_event_registered(&event).await);
    }

    #[tokio::test]
    async fn last_scanned_block_defaults_to_zero() {
        let repo = InMemoryRepository::new();
        assert_eq!(repo.get_last_scanned_block(440).await.unwrap(), 0);
        repo.set_last_scanned_block(440, 55).await.unwrap();
        assert_eq!(repo.get_last_scanned_block(440).await.unwrap(), 55);
    }
}
