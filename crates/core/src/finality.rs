//! Block-finality subsystem.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ChainConfig;
use crate::error::ConsumerError;
use crate::event::Event;
use crate::traits::ChainRpc;

pub const DEFAULT_ALLOCATED_TIME_SECS: u64 = 1200;

/// Pure: `block_finality = block_step + wait_block_validation`,
/// `block_finality_in_sec = wait_block_validation * block_validation_second_per_block`.
pub fn calculate_block_finality(event: &Event, chain: &ChainConfig) -> (u64, u64) {
    let block_finality = event.data.block_step + chain.wait_block_validation;
    let block_finality_in_sec = chain.wait_block_validation * chain.block_validation_second_per_block;
    (block_finality, block_finality_in_sec)
}

/// Blocking wait with cancellation.
///
/// Returns the head block number actually observed (`>= block_finality`).
pub async fn wait_for_finality(
    rpc: &dyn ChainRpc,
    block_finality: u64,
    block_finality_in_sec: u64,
    allocated_time: Duration,
    shutdown: &CancellationToken,
) -> Result<u64, ConsumerError> {
    let mut elapsed = Duration::from_secs(0);
    let mut first_iteration = true;

    loop {
        let head = rpc
            .current_block_number()
            .await
            .map_err(|e| ConsumerError::BlockValidationFailed(e.to_string()))?;

        if head >= block_finality {
            info!(head, block_finality, "block finality validated");
            return Ok(head);
        }

        if elapsed >= allocated_time {
            return Err(ConsumerError::BlockFinalityTimeExceeded);
        }

        let sleep_for = if first_iteration {
            Duration::from_secs(block_finality_in_sec)
        } else {
            Duration::from_secs(1)
        };
        first_iteration = false;

        info!(head, block_finality, sleep_secs = sleep_for.as_secs(), "waiting for block finality");

        tokio::select! {
            _ = shutdown.cancelled() => {
                return Err(ConsumerError::BlockFinalityTimeExceeded);
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }

        elapsed += sleep_for;
        if elapsed >= allocated_time {
            return Err(ConsumerError::BlockFinalityTimeExceeded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use alloy_primitives::{Address, U256};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::error::ChainError;
    use crate::event::EventName;
    use crate::traits::RawLog;

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
            _address: &str,
            _topics: &[String],
            _from: u64,
            _to: u64,
        ) -> Result<Vec<RawLog>, ChainError> {
            Ok(vec![])
        }
        async fn account_address(&self) -> Result<String, ChainError> {
            Ok("0x0".to_string())
        }
        async fn transaction_count(&self, _a: &str) -> Result<u64, ChainError> {
            Ok(0)
        }
        async fn client_version(&self) -> Result<String, ChainError> {
            Ok("fake/1.0".to_string())
        }
    }

    fn sample_event(block_step: u64) -> Event {
        Event {
            chain_id: 440,
            event_name: EventName::FeesDepositConfirmed,
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
                block_step,
            ),
        }
    }

    #[test]
    fn calculate_block_finality_matches_formula() {
        let chain = ChainConfig {
            chain_id: 440,
            rpc_urls: vec!["http://localhost".into()],
            project_id: None,
            private_key: None,
            contract_address: "0x0".into(),
            deployment_block: 0,
            wait_block_validation: 12,
            block_validation_second_per_block: 15,
        };
        let event = sample_event(100);
        let (finality, finality_sec) = calculate_block_finality(&event, &chain);
        assert_eq!(finality, 112);
        assert_eq!(finality_sec, 180);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_head_already_past_target() {
        let rpc = FakeRpc { head: AtomicU64::new(200) };
        let shutdown = CancellationToken::new();
        let head = wait_for_finality(&rpc, 112, 180, Duration::from_secs(1200), &shutdown)
            .await
            .unwrap();
        assert_eq!(head, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_allocated_time_times_out_when_behind() {
        let rpc = FakeRpc { head: AtomicU64::new(0) };
        let shutdown = CancellationToken::new();
        let err = wait_for_finality(&rpc, 112, 180, Duration::from_secs(0), &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::BlockFinalityTimeExceeded));
    }
}
