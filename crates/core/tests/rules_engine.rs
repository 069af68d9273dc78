//! Integration-style exercise of `manage_event_with_rules` through the public
//! API, using in-memory fakes for the repository, chain RPC, and dispatcher.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use relayer_core::config::{ChainConfig, EventRuleConfig, RegisterConfig, RelayerConfig};
use relayer_core::error::{ChainError, DispatchError, RepoError};
use relayer_core::event::{BridgeTask, ChainSide, Event, EventName, EventPayload, TaskStatus};
use relayer_core::rules::manage_event_with_rules;
use relayer_core::traits::{ChainRpc, Dispatcher, RawLog, Repository, TxResult};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct FakeRepo {
    tasks: RwLock<HashMap<String, BridgeTask>>,
}

impl FakeRepo {
    fn new() -> Self {
        Self { tasks: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl Repository for FakeRepo {
    async fn save_event(&self, _event: &Event) -> Result<(), RepoError> {
        Ok(())
    }
    async fn get_event(&self, _id: &str) -> Result<Event, RepoError> {
        Err(RepoError::Get("not found".into()))
    }
    async fn get_events(&self) -> Result<Vec<Event>, RepoError> {
        Ok(vec![])
    }
    async fn delete_event(&self, _id: &str) -> Result<(), RepoError> {
        Ok(())
    }
    async fn save_bridge_task(&self, task: &BridgeTask) -> Result<(), RepoError> {
        self.tasks.write().await.insert(task.id(), task.clone());
        Ok(())
    }
    async fn get_bridge_task(&self, id: &str) -> Result<BridgeTask, RepoError> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::Get(id.to_string()))
    }
    async fn get_bridge_tasks(&self) -> Result<Vec<BridgeTask>, RepoError> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }
    async fn set_last_scanned_block(&self, _chain_id: u64, _n: u64) -> Result<(), RepoError> {
        Ok(())
    }
    async fn get_last_scanned_block(&self, _chain_id: u64) -> Result<u64, RepoError> {
        Ok(0)
    }
}

struct FakeRpc {
    head: AtomicU64,
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn current_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head.load(Ordering::SeqCst))
    }
    async fn block_timestamp(&self, _n: u64) -> Result<Option<chrono::DateTime<Utc>>, ChainError> {
        Ok(Some(Utc::now()))
    }
    async fn get_logs(&self, _a: &str, _t: &[String], _f: u64, _to: u64) -> Result<Vec<RawLog>, ChainError> {
        Ok(vec![])
    }
    async fn account_address(&self) -> Result<String, ChainError> {
        Ok("0x0".into())
    }
    async fn transaction_count(&self, _a: &str) -> Result<u64, ChainError> {
        Ok(0)
    }
    async fn client_version(&self) -> Result<String, ChainError> {
        Ok("fake/1.0".into())
    }
}

struct FakeDispatcher {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn execute(
        &self,
        _chain_id: u64,
        _operation_hash: [u8; 32],
        func_name: &str,
        _params: serde_json::Value,
        _block_step: u64,
    ) -> Result<TxResult, DispatchError> {
        self.calls.lock().unwrap().push(func_name.to_string());
        Ok(TxResult {
            tx_hash: "0xdead".into(),
            block_hash: "0xbeef".into(),
            block_number: 1,
            gas_used: 21_000,
            status: 1,
        })
    }
}

fn config_with_dependency() -> RelayerConfig {
    let mut chains = BTreeMap::new();
    chains.insert(
        440,
        ChainConfig {
            chain_id: 440,
            rpc_urls: vec!["http://localhost".into()],
            project_id: None,
            private_key: None,
            contract_address: "0x0".into(),
            deployment_block: 0,
            wait_block_validation: 0,
            block_validation_second_per_block: 1,
        },
    );
    let mut event_rules = BTreeMap::new();
    event_rules.insert(
        EventName::FeesDeposited,
        EventRuleConfig {
            event_name: EventName::FeesDeposited,
            origin: ChainSide::ChainIdFrom,
            has_block_finality: false,
            chain_func_name: None,
            func_name: None,
            depends_on: None,
        },
    );
    event_rules.insert(
        EventName::OperationCreated,
        EventRuleConfig {
            event_name: EventName::OperationCreated,
            origin: ChainSide::ChainIdFrom,
            has_block_finality: false,
            chain_func_name: Some(ChainSide::ChainIdTo),
            func_name: Some("finalizeOperation".into()),
            depends_on: Some(EventName::FeesDeposited),
        },
    );

    RelayerConfig {
        chains,
        register: RegisterConfig {
            host: "localhost".into(),
            port: 5672,
            user: "guest".into(),
            password: "guest".into(),
            queue_name: "q".into(),
        },
        event_rules,
    }
}

fn event(event_name: EventName, operation_hash: [u8; 32]) -> Event {
    Event {
        chain_id: 440,
        event_name,
        block_number: 100,
        tx_hash: "0xabc".into(),
        log_index: 0,
        block_datetime: Utc::now(),
        handled: None,
        data: EventPayload::new(
            Address::ZERO,
            Address::ZERO,
            440,
            440,
            "ethereum".into(),
            U256::from(1u64),
            1,
            vec![0; 65],
            operation_hash,
            100,
        ),
    }
}

/// A pair of events sharing an operation hash: the second's dispatch only
/// proceeds once the first (its dependency) has resolved to SUCCESS.
#[tokio::test]
async fn dependent_event_dispatches_only_after_dependency_succeeds() {
    let repo = FakeRepo::new();
    let rpc = FakeRpc { head: AtomicU64::new(200) };
    let dispatcher = FakeDispatcher { calls: Mutex::new(vec![]) };
    let config = config_with_dependency();
    let shutdown = CancellationToken::new();
    let operation_hash = [9u8; 32];

    let dependent = event(EventName::OperationCreated, operation_hash);
    manage_event_with_rules(&dependent, &config, &repo, &rpc, &dispatcher, &shutdown)
        .await
        .unwrap();
    assert!(dispatcher.calls.lock().unwrap().is_empty());

    let dependency = event(EventName::FeesDeposited, operation_hash);
    manage_event_with_rules(&dependency, &config, &repo, &rpc, &dispatcher, &shutdown)
        .await
        .unwrap();

    manage_event_with_rules(&dependent, &config, &repo, &rpc, &dispatcher, &shutdown)
        .await
        .unwrap();

    assert_eq!(*dispatcher.calls.lock().unwrap(), vec!["finalizeOperation".to_string()]);
    let task = repo
        .get_bridge_task(&format!("{operation_hash_hex}-{event_name}",
            operation_hash_hex = dependent.data.operation_hash_hex,
            event_name = EventName::OperationCreated))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Success);
}
