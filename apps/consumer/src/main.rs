mod config;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Bridge task consumer: applies the per-event rule to queued events")]
struct Args {
    /// Re-publish every FAILED bridge task's underlying event for this
    /// chain id, then exit, instead of consuming the queue.
    #[arg(long, value_name = "CHAIN_ID")]
    resume_chain: Option<u64>,

    /// Re-publish one event (identified by `block_number-tx_hash-log_index`),
    /// then exit, instead of consuming the queue.
    #[arg(long, value_name = "EVENT_KEY")]
    resume_event: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load_config()?;

    if let Some(chain_id) = args.resume_chain {
        tracing::info!(chain_id, "resuming failed bridge tasks for chain");
        return runner::resume_chain(&cfg, chain_id).await;
    }
    if let Some(event_key) = args.resume_event {
        tracing::info!(event_key = %event_key, "resuming single event");
        return runner::resume_event(&cfg, &event_key).await;
    }

    tracing::info!("consumer starting");

    let shutdown = CancellationToken::new();

    let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();
    {
        let shutdown = shutdown.clone();
        join_set.spawn(async move { runner::consume(cfg, shutdown).await });
    }

    tracing::info!("consumer started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("consumer task panicked")?;
                match res {
                    Ok(()) => {},
                    Err(e) => fatal = Some(e.context("consumer task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("consumer task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("consumer task failed"));
        }
    }

    fatal.map_or(Ok(()), Err)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
