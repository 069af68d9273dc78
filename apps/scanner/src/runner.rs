use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use relayer_chain::abi::{decode_log, event_topics};
use relayer_chain::JsonRpcChain;
use relayer_core::error::ScanError;
use relayer_core::event::Event;
use relayer_core::scan::{halve_range_end, ChunkPolicy, RetryLadder};
use relayer_core::traits::{ChainRpc, Queue, RawLog, Repository};
use relayer_core::wire;
use relayer_queue::{AmqpConfig, AmqpQueue};
use relayer_repository::PostgresRepository;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;

pub async fn run(cfg: AppConfig, shutdown: CancellationToken) -> Result<()> {
    let chain_cfg = cfg.relayer.chain(cfg.chain_id)?.clone();

    let repo = PostgresRepository::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("connect to repository database")?;
    repo.migrate().await.context("run repository migrations")?;

    let rpc = JsonRpcChain::new(chain_cfg.rpc_urls.clone()).context("build chain rpc client")?;
    let queue = AmqpQueue::new(AmqpConfig {
        host: cfg.relayer.register.host.clone(),
        port: cfg.relayer.register.port,
        user: cfg.relayer.register.user.clone(),
        password: cfg.relayer.register.password.clone(),
        queue_name: cfg.relayer.register.queue_name.clone(),
    });

    let topics = event_topics();
    let chunk_policy = ChunkPolicy::default();
    let retry_ladder = RetryLadder::default();

    let last_scanned = repo.get_last_scanned_block(cfg.chain_id).await.unwrap_or(0);
    let mut start_block = if cfg.resume && last_scanned > 0 {
        last_scanned
            .saturating_sub(cfg.reorg_window)
            .max(chain_cfg.deployment_block)
    } else {
        chain_cfg.deployment_block
    };

    let account_address = rpc.account_address().await.unwrap_or_else(|_| "unknown".to_string());
    let client_version = rpc.client_version().await.unwrap_or_else(|e| {
        warn!(err = %ScanError::ClientVersionError(e.to_string()), "client_version lookup failed");
        "unknown".to_string()
    });

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let head = rpc.current_block_number().await.context("eth_blockNumber")?;
        let end_block = head.saturating_sub(1);

        show_cli_title(
            cfg.chain_id,
            &chain_cfg.rpc_urls,
            &client_version,
            &account_address,
            &chain_cfg.contract_address,
            chain_cfg.deployment_block,
            start_block,
            end_block,
        );

        if start_block > end_block {
            // Under the reorg-window resume scheme this only happens on a
            // chain stall/regression larger than the configured window; it
            // never fires during ordinary "nothing new yet" polling.
            return Err(ScanError::ScanFailed(format!(
                "start_block {start_block} is past end_block {end_block}"
            ))
            .into());
        }

        let scan_started = std::time::Instant::now();
        let mut current_block = start_block;
        let mut chunk_size = cfg.start_chunk_size;
        let mut total_events = 0u64;
        let mut total_chunks = 0u64;

        while current_block <= end_block {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let estimated_end = end_block.min(current_block + chunk_size - 1);
            let (logs, actual_end) = fetch_range_with_retry(
                &rpc,
                &chain_cfg.contract_address,
                &topics,
                current_block,
                estimated_end,
                &retry_ladder,
                &shutdown,
            )
            .await?;

            let events_found = store_and_register_logs(
                &repo,
                &queue,
                &rpc,
                cfg.chain_id,
                logs,
            )
            .await?;

            total_events += events_found;
            total_chunks += 1;
            chunk_size = chunk_policy.next_chunk_size(chunk_size, events_found);
            current_block = actual_end + 1;
        }

        repo.set_last_scanned_block(cfg.chain_id, end_block)
            .await
            .context("persist last scanned block")?;

        if total_events > 0 {
            info!(
                chain_id = cfg.chain_id,
                total_events,
                total_chunks,
                duration_ms = scan_started.elapsed().as_millis() as u64,
                "scanned events"
            );
        }

        if cfg.run_once {
            return Ok(());
        }

        start_block = end_block.saturating_sub(cfg.reorg_window).saturating_add(1);

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = sleep(cfg.poll_interval) => {}
        }
    }
}

async fn fetch_range_with_retry(
    rpc: &JsonRpcChain,
    contract_address: &str,
    topics: &[String],
    start: u64,
    mut end: u64,
    retry_ladder: &RetryLadder,
    shutdown: &CancellationToken,
) -> Result<(Vec<RawLog>, u64)> {
    let mut attempt = 0u32;
    loop {
        match rpc.get_logs(contract_address, topics, start, end).await {
            Ok(logs) => return Ok((logs, end)),
            Err(e) => {
                attempt += 1;
                warn!(start, end, attempt, err = %e, "eth_getLogs failed");
                if attempt >= retry_ladder.max_request_retries {
                    return Err(ScanError::FetchEventOutOfRetries { start, end }.into());
                }
                if let Some(new_end) = halve_range_end(start, end) {
                    if new_end < end {
                        end = new_end;
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => anyhow::bail!("shutdown requested while retrying range"),
                    _ = sleep(Duration::from_secs(retry_ladder.request_retry_seconds)) => {}
                }
            }
        }
    }
}

async fn store_and_register_logs(
    repo: &PostgresRepository,
    queue: &AmqpQueue,
    rpc: &JsonRpcChain,
    chain_id: u64,
    logs: Vec<RawLog>,
) -> Result<u64> {
    let mut count = 0u64;
    let mut block_datetimes: HashMap<u64, chrono::DateTime<chrono::Utc>> = HashMap::new();
    for log in logs {
        let Some(log_index) = log.log_index else {
            return Err(ScanError::ErrorBlockPending.into());
        };

        let (event_name, payload) = match decode_log(&log) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(tx_hash = %log.tx_hash, err = %e, "skipping undecodable log");
                continue;
            }
        };

        let block_datetime = match block_datetimes.get(&log.block_number) {
            Some(dt) => *dt,
            None => {
                let dt = rpc
                    .block_timestamp(log.block_number)
                    .await
                    .with_context(|| format!("fetch block timestamp for block {}", log.block_number))?
                    .ok_or_else(|| anyhow::anyhow!("block {} has no timestamp", log.block_number))?;
                block_datetimes.insert(log.block_number, dt);
                dt
            }
        };
        let mut event = Event {
            chain_id,
            event_name,
            block_number: log.block_number,
            tx_hash: log.tx_hash.clone(),
            log_index,
            block_datetime,
            handled: None,
            data: payload,
        };

        let is_new = repo
            .store_event(&event)
            .await
            .context("store scanned event")?;
        if !is_new {
            continue;
        }
        count += 1;

        let bytes = wire::to_bytes(&event).context("encode event for queue")?;
        if let Err(e) = queue.register_event(bytes).await {
            warn!(event = %event.id(), err = %e, "failed to register event on queue");
            continue;
        }
        repo.set_event_as_registered(&mut event)
            .await
            .context("mark event as registered")?;
    }
    Ok(count)
}

#[allow(clippy::too_many_arguments)]
fn show_cli_title(
    chain_id: u64,
    rpc_urls: &[String],
    client_version: &str,
    account_address: &str,
    contract_address: &str,
    deployment_block: u64,
    start_block: u64,
    end_block: u64,
) {
    info!(
        chain_id,
        rpc_url = %rpc_urls.first().map(String::as_str).unwrap_or(""),
        client_version,
        account_address,
        contract_address,
        deployment_block,
        start_block,
        end_block,
        blocks_to_scan = end_block.saturating_sub(start_block),
        "waiting for events, to exit press CTRL+C"
    );
}
