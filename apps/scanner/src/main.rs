mod config;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Blockchain event scanner for one chain_id")]
struct Args {
    /// Chain id to scan, e.g. 1337.
    #[arg(long, short = 'i')]
    chain_id: u64,

    /// Resume from the last persisted scan cursor instead of the
    /// contract's deployment block.
    #[arg(long, short = 'r')]
    resume: bool,

    /// Scan the currently available block range once and exit, instead
    /// of running as a long-lived service.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load_config(args.chain_id, args.resume, args.once)?;
    tracing::info!(chain_id = cfg.chain_id, resume = cfg.resume, once = cfg.run_once, "scanner starting");

    let shutdown = CancellationToken::new();

    let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();
    {
        let shutdown = shutdown.clone();
        join_set.spawn(async move { runner::run(cfg, shutdown).await });
    }

    tracing::info!("scanner started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("scanner task panicked")?;
                match res {
                    Ok(()) => {},
                    Err(e) => fatal = Some(e.context("scanner task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("scanner task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("scanner task failed"));
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
