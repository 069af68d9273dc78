use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use relayer_chain::{AlloyDispatcher, JsonRpcChain};
use relayer_core::event::{Event, TaskStatus};
use relayer_core::rules::manage_event_with_rules;
use relayer_core::traits::{Dispatcher, Queue, Repository};
use relayer_core::{config::RelayerConfig, wire};
use relayer_queue::{AmqpConfig, AmqpQueue};
use relayer_repository::PostgresRepository;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{dispatcher_config, AppConfig};

fn queue_for(relayer: &RelayerConfig) -> AmqpQueue {
    AmqpQueue::new(AmqpConfig {
        host: relayer.register.host.clone(),
        port: relayer.register.port,
        user: relayer.register.user.clone(),
        password: relayer.register.password.clone(),
        queue_name: relayer.register.queue_name.clone(),
    })
}

async fn build_rpcs(relayer: &RelayerConfig) -> Result<HashMap<u64, JsonRpcChain>> {
    let mut rpcs = HashMap::new();
    for (chain_id, chain) in &relayer.chains {
        let rpc = JsonRpcChain::new(chain.rpc_urls.clone())
            .with_context(|| format!("build rpc client for chain_id={chain_id}"))?;
        rpcs.insert(*chain_id, rpc);
    }
    Ok(rpcs)
}

/// Long-running consumer worker: reads events off the queue and applies the
/// per-event rule to each one.
pub async fn consume(cfg: AppConfig, shutdown: CancellationToken) -> Result<()> {
    let repo = PostgresRepository::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("connect to repository database")?;
    repo.migrate().await.context("run repository migrations")?;

    let dispatcher = AlloyDispatcher::new(dispatcher_config(&cfg.relayer)?);
    let rpcs = build_rpcs(&cfg.relayer).await?;
    let queue = queue_for(&cfg.relayer);

    let repo = Arc::new(repo);
    let dispatcher = Arc::new(dispatcher);
    let rpcs = Arc::new(rpcs);
    let config = Arc::new(cfg.relayer);

    info!("waiting for events, to exit press CTRL+C");

    let callback_shutdown = shutdown.clone();
    let callback = Box::new(move |bytes: Vec<u8>| {
        let repo = repo.clone();
        let dispatcher = dispatcher.clone();
        let rpcs = rpcs.clone();
        let config = config.clone();
        let shutdown = callback_shutdown.clone();
        Box::pin(async move {
            let event: Event = wire::from_bytes(&bytes).context("decode queued event")?;
            let rpc = rpcs
                .get(&event.chain_id)
                .ok_or_else(|| anyhow::anyhow!("no rpc client configured for chain_id={}", event.chain_id))?;

            manage_event_with_rules(&event, &config, repo.as_ref(), rpc, dispatcher.as_ref(), &shutdown)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        }) as futures::future::BoxFuture<'static, anyhow::Result<()>>
    });

    queue.read_events(callback, shutdown).await?;
    Ok(())
}

/// Re-registers every FAILED bridge task's underlying event for `chain_id`
/// back onto the queue, so a fresh consumer pass re-derives their status.
pub async fn resume_chain(cfg: &AppConfig, chain_id: u64) -> Result<()> {
    let repo = PostgresRepository::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("connect to repository database")?;
    let queue = queue_for(&cfg.relayer);

    let tasks = repo.get_bridge_tasks().await.context("list bridge tasks")?;
    let mut resumed = 0u32;
    for task in tasks.into_iter().filter(|t| t.chain_id == chain_id && t.status == TaskStatus::Failed) {
        match repo.get_event(&task.secondary_id()).await {
            Ok(event) => {
                info!(chain_id, event_key = %task.secondary_id(), "resuming event");
                let bytes = wire::to_bytes(&event).context("encode event for queue")?;
                if let Err(e) = queue.register_event(bytes).await {
                    warn!(chain_id, event_key = %task.secondary_id(), err = %e, "failed to resume event");
                    continue;
                }
                resumed += 1;
            }
            Err(e) => {
                error!(chain_id, event_key = %task.secondary_id(), err = %e, "stored event missing for failed task");
            }
        }
    }

    info!(chain_id, resumed, "resume complete");
    Ok(())
}

/// Re-registers a single event (identified by its own id) back onto the
/// queue.
pub async fn resume_event(cfg: &AppConfig, event_key: &str) -> Result<()> {
    let repo = PostgresRepository::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("connect to repository database")?;
    let queue = queue_for(&cfg.relayer);

    let event = repo.get_event(event_key).await.with_context(|| format!("event {event_key} not found"))?;
    let bytes = wire::to_bytes(&event).context("encode event for queue")?;
    queue.register_event(bytes).await.context("register event on queue")?;

    info!(event_key, "resume complete");
    Ok(())
}
