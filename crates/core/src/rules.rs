//! Per-event decision procedure: finality wait, dependency check, dispatch.
//!
//! Idempotent per `(operation_hash, event_name)`: re-delivery of the same
//! event re-enters at PROCESSING and re-derives the same terminal status.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{EventRuleConfig, RelayerConfig};
use crate::error::{ConsumerError, RepoError};
use crate::event::{BridgeTask, Event, TaskStatus};
use crate::finality::{calculate_block_finality, wait_for_finality, DEFAULT_ALLOCATED_TIME_SECS};
use crate::traits::{ChainRpc, Dispatcher, Repository};

/// Errors that terminate the rule with a recorded FAILED status. Everything
/// else propagates and leaves the task at PROCESSING for a resume pass to
/// retry — currently nothing does, since a redelivered message that doesn't
/// resolve to a terminal status would otherwise requeue forever.
fn is_terminal(err: &ConsumerError) -> bool {
    matches!(
        err,
        ConsumerError::BlockValidityError(_)
            | ConsumerError::BlockValidationFailed(_)
            | ConsumerError::DispatchFailed(_)
    )
}

async fn save_status(
    repo: &dyn Repository,
    event: &Event,
    status: TaskStatus,
) -> Result<(), RepoError> {
    let mut task = BridgeTask::new_processing(event);
    task.status = status;
    repo.save_bridge_task(&task).await
}

/// Runs the body of the rule: finality wait, depends-on check, dispatch.
/// Returns `Ok(())` on success, or the `ConsumerError` that should decide
/// the terminal status.
async fn run_rule(
    event: &Event,
    rule: &EventRuleConfig,
    config: &RelayerConfig,
    repo: &dyn Repository,
    rpc: &dyn ChainRpc,
    dispatcher: &dyn Dispatcher,
    shutdown: &CancellationToken,
) -> Result<(), ConsumerError> {
    if rule.has_block_finality {
        let chain = config
            .chain(event.chain_id)
            .map_err(|e| ConsumerError::CalculateBlockFinalityError(e.to_string()))?;
        let (block_finality, block_finality_in_sec) = calculate_block_finality(event, chain);
        info!(
            chain_id = event.chain_id,
            block_finality, "validating block finality"
        );
        wait_for_finality(
            rpc,
            block_finality,
            block_finality_in_sec,
            Duration::from_secs(DEFAULT_ALLOCATED_TIME_SECS),
            shutdown,
        )
        .await
        .map_err(|e| ConsumerError::BlockValidationFailed(e.to_string()))?;
    }

    if let Some(depends_on) = rule.depends_on {
        let dependency_id = format!("{}-{}", event.data.operation_hash_hex, depends_on);
        let depends_on_status = repo.get_bridge_task(&dependency_id).await.ok().map(|t| t.status);

        info!(
            operation_hash = %event.data.operation_hash_hex,
            depends_on = %depends_on,
            status = ?depends_on_status,
            "checking dependency"
        );

        match depends_on_status {
            Some(TaskStatus::Failed) => {
                return Err(ConsumerError::BlockValidityError(format!(
                    "dependency event {depends_on} has failed"
                )));
            }
            Some(TaskStatus::Success) => {}
            _ => {
                // Dependency has not resolved yet; this side is vacuously
                // satisfied and the other side of the pair is responsible
                // for the dispatch once it runs.
                return Ok(());
            }
        }
    }

    if let (Some(func_name), Some(chain_func_name)) = (&rule.func_name, rule.chain_func_name) {
        let target_chain_id = chain_func_name.resolve(&event.data);
        let params = json!({
            "from": event.data.from.to_string(),
            "to": event.data.to.to_string(),
            "chainIdFrom": event.data.chain_id_from,
            "chainIdTo": event.data.chain_id_to,
            "tokenName": event.data.token_name,
            "amount": event.data.amount.to_string(),
            "nonce": event.data.nonce,
        });

        dispatcher
            .execute(
                target_chain_id,
                event.data.operation_hash_bytes,
                func_name,
                params,
                event.data.block_step,
            )
            .await
            .map_err(|e| ConsumerError::DispatchFailed(e.to_string()))?;
    }

    Ok(())
}

/// Entry point invoked once per delivered event.
pub async fn manage_event_with_rules(
    event: &Event,
    config: &RelayerConfig,
    repo: &dyn Repository,
    rpc: &dyn ChainRpc,
    dispatcher: &dyn Dispatcher,
    shutdown: &CancellationToken,
) -> Result<(), ConsumerError> {
    let rule = match config.rule(event.event_name) {
        Ok(rule) => rule.clone(),
        Err(e) => {
            warn!(event = %event.event_name, "unknown event, skipping: {e}");
            return Ok(());
        }
    };

    info!(
        chain_id = event.chain_id,
        operation_hash = %event.data.operation_hash_hex,
        event = %event.event_name,
        "received event"
    );
    save_status(repo, event, TaskStatus::Processing)
        .await
        .map_err(|e| ConsumerError::BridgeTaskInvalidStatus(e.to_string()))?;

    match run_rule(event, &rule, config, repo, rpc, dispatcher, shutdown).await {
        Ok(()) => {
            save_status(repo, event, TaskStatus::Success)
                .await
                .map_err(|e| ConsumerError::BridgeTaskInvalidStatus(e.to_string()))?;
            Ok(())
        }
        Err(e) if is_terminal(&e) => {
            error!(
                chain_id = event.chain_id,
                operation_hash = %event.data.operation_hash_hex,
                event = %event.event_name,
                "failed to manage event: {e}"
            );
            save_status(repo, event, TaskStatus::Failed)
                .await
                .map_err(|e| ConsumerError::BridgeTaskInvalidStatus(e.to_string()))?;
            Ok(())
        }
        Err(e) => {
            // No `ConsumerError` variant currently reaches this arm; it
            // exists for a future retry-worthy error that should leave the
            // task at PROCESSING for a resume pass instead of a saved FAILED.
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, RegisterConfig};
    use crate::error::{ChainError, DispatchError};
    use crate::event::{EventName, EventPayload};
    use crate::traits::{RawLog, TxResult};
    use alloy_primitives::{Address, U256};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::sync::RwLock;

    struct FakeRepo {
        tasks: RwLock<std::collections::HashMap<String, BridgeTask>>,
    }

    impl FakeRepo {
        fn new() -> Self {
            Self {
                tasks: RwLock::new(std::collections::HashMap::new()),
            }
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
        async fn get_logs(
            &self,
            _a: &str,
            _t: &[String],
            _f: u64,
            _to: u64,
        ) -> Result<Vec<RawLog>, ChainError> {
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
        calls: Mutex<u32>,
        fail: bool,
    }

    #[async_trait]
    impl Dispatcher for FakeDispatcher {
        async fn execute(
            &self,
            _chain_id: u64,
            _operation_hash: [u8; 32],
            _func_name: &str,
            _params: serde_json::Value,
            _block_step: u64,
        ) -> Result<TxResult, DispatchError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(DispatchError::ContractExecFailed("reverted".into()));
            }
            Ok(TxResult {
                tx_hash: "0xdead".into(),
                block_hash: "0xbeef".into(),
                block_number: 1,
                gas_used: 21_000,
                status: 1,
            })
        }
    }

    fn sample_config() -> RelayerConfig {
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
            EventName::FeesDepositConfirmed,
            EventRuleConfig {
                event_name: EventName::FeesDepositConfirmed,
                origin: crate::event::ChainSide::ChainIdTo,
                has_block_finality: false,
                chain_func_name: Some(crate::event::ChainSide::ChainIdFrom),
                func_name: Some("receiveFeesLockConfirmation".into()),
                depends_on: None,
            },
        );
        event_rules.insert(
            EventName::OperationCreated,
            EventRuleConfig {
                event_name: EventName::OperationCreated,
                origin: crate::event::ChainSide::ChainIdFrom,
                has_block_finality: false,
                chain_func_name: None,
                func_name: None,
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

    fn sample_event(event_name: EventName) -> Event {
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
                1337,
                440,
                "ethereum".into(),
                U256::from(1u64),
                1,
                vec![0; 65],
                [1u8; 32],
                100,
            ),
        }
    }

    #[tokio::test]
    async fn dispatches_and_marks_success() {
        let repo = FakeRepo::new();
        let rpc = FakeRpc { head: AtomicU64::new(200) };
        let dispatcher = FakeDispatcher { calls: Mutex::new(0), fail: false };
        let config = sample_config();
        let event = sample_event(EventName::FeesDepositConfirmed);
        let shutdown = CancellationToken::new();

        manage_event_with_rules(&event, &config, &repo, &rpc, &dispatcher, &shutdown)
            .await
            .unwrap();

        assert_eq!(*dispatcher.calls.lock().unwrap(), 1);
        let task = repo
            .get_bridge_task(&format!("{}-{}", event.data.operation_hash_hex, event.event_name))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn dispatch_failure_marks_failed_and_returns_ok() {
        let repo = FakeRepo::new();
        let rpc = FakeRpc { head: AtomicU64::new(200) };
        let dispatcher = FakeDispatcher { calls: Mutex::new(0), fail: true };
        let config = sample_config();
        let event = sample_event(EventName::FeesDepositConfirmed);
        let shutdown = CancellationToken::new();

        let result = manage_event_with_rules(&event, &config, &repo, &rpc, &dispatcher, &shutdown).await;
        assert!(result.is_ok());

        let task = repo
            .get_bridge_task(&format!("{}-{}", event.data.operation_hash_hex, event.event_name))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn unsatisfied_dependency_leaves_task_success_without_dispatch() {
        let repo = FakeRepo::new();
        let rpc = FakeRpc { head: AtomicU64::new(200) };
        let dispatcher = FakeDispatcher { calls: Mutex::new(0), fail: false };
        let config = sample_config();
        let event = sample_event(EventName::OperationCreated);
        let shutdown = CancellationToken::new();

        manage_event_with_rules(&event, &config, &repo, &rpc, &dispatcher, &shutdown)
            .await
            .unwrap();

        assert_eq!(*dispatcher.calls.lock().unwrap(), 0);
        let task = repo
            .get_bridge_task(&format!("{}-{}", event.data.operation_hash_hex, event.event_name))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn failed_dependency_marks_this_task_failed() {
        let repo = FakeRepo::new();
        let rpc = FakeRpc { head: AtomicU64::new(200) };
        let dispatcher = FakeDispatcher { calls: Mutex::new(0), fail: false };
        let config = sample_config();
        let event = sample_event(EventName::OperationCreated);
        let shutdown = CancellationToken::new();

        let dependency_id = format!("{}-{}", event.data.operation_hash_hex, EventName::FeesDeposited);
        repo.save_bridge_task(&BridgeTask {
            chain_id: 440,
            block_number: 1,
            tx_hash: "0xdep".into(),
            log_index: 0,
            operation_hash: event.data.operation_hash_hex.clone(),
            event_name: EventName::FeesDeposited,
            status: TaskStatus::Failed,
            datetime: Utc::now(),
        })
        .await
        .unwrap();
        assert!(repo.get_bridge_task(&dependency_id).await.is_ok());

        manage_event_with_rules(&event, &config, &repo, &rpc, &dispatcher, &shutdown)
            .await
            .unwrap();

        let task = repo
            .get_bridge_task(&format!("{}-{}", event.data.operation_hash_hex, event.event_name))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn finality_timeout_is_terminal_and_marks_task_failed() {
        let repo = FakeRepo::new();
        // Head never advances, so `wait_for_finality` can never observe
        // `block_finality` and eventually times out.
        let rpc = FakeRpc { head: AtomicU64::new(0) };
        let dispatcher = FakeDispatcher { calls: Mutex::new(0), fail: false };
        let mut config = sample_config();
        config.event_rules.insert(
            EventName::FeesLockedConfirmed,
            EventRuleConfig {
                event_name: EventName::FeesLockedConfirmed,
                origin: crate::event::ChainSide::ChainIdTo,
                has_block_finality: true,
                chain_func_name: None,
                func_name: None,
                depends_on: None,
            },
        );
        let event = sample_event(EventName::FeesLockedConfirmed);
        let shutdown = CancellationToken::new();

        let result = manage_event_with_rules(&event, &config, &repo, &rpc, &dispatcher, &shutdown).await;
        assert!(result.is_ok());
        assert_eq!(*dispatcher.calls.lock().unwrap(), 0);

        let task = repo
            .get_bridge_task(&format!("{}-{}", event.data.operation_hash_hex, event.event_name))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_event_name_rule_is_skipped_quietly() {
        let repo = FakeRepo::new();
        let rpc = FakeRpc { head: AtomicU64::new(200) };
        let dispatcher = FakeDispatcher { calls: Mutex::new(0), fail: false };
        let mut config = sample_config();
        config.event_rules.clear();
        let event = sample_event(EventName::OperationFinalized);
        let shutdown = CancellationToken::new();

        manage_event_with_rules(&event, &config, &repo, &rpc, &dispatcher, &shutdown)
            .await
            .unwrap();
        assert_eq!(*dispatcher.calls.lock().unwrap(), 0);
    }
}
