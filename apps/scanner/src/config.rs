use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use relayer_core::config::{parse_relayer_config, substitute_placeholders, RelayerConfig};
use serde::Deserialize;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_START_CHUNK_SIZE: u64 = 20;
const DEFAULT_REORG_WINDOW: u64 = 10;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ScannerEnv {
    database_url: String,
    db_max_connections: u32,
    relayer_config_path: String,
    start_chunk_size: u64,
    reorg_window: u64,
    poll_interval_secs: u64,
}

impl Default for ScannerEnv {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            relayer_config_path: "config/relayer.toml".to_string(),
            start_chunk_size: DEFAULT_START_CHUNK_SIZE,
            reorg_window: DEFAULT_REORG_WINDOW,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub relayer: RelayerConfig,
    pub chain_id: u64,
    pub start_chunk_size: u64,
    pub reorg_window: u64,
    pub poll_interval: Duration,
    pub resume: bool,
    pub run_once: bool,
}

pub fn load_config(chain_id: u64, resume: bool, run_once: bool) -> Result<AppConfig> {
    let env: ScannerEnv = envy::from_env().context("load scanner env config")?;
    if env.database_url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }

    let template = std::fs::read_to_string(&env.relayer_config_path)
        .with_context(|| format!("read relayer config at {}", env.relayer_config_path))?;

    let env_vars: HashMap<String, String> = std::env::vars().collect();
    let rendered = substitute_placeholders(&template, &env_vars)
        .context("render relayer config placeholders")?;
    let relayer = parse_relayer_config(&rendered).context("parse relayer config")?;

    relayer
        .chain(chain_id)
        .with_context(|| format!("no chain config for chain_id={chain_id}"))?;

    Ok(AppConfig {
        database_url: env.database_url,
        db_max_connections: env.db_max_connections,
        relayer,
        chain_id,
        start_chunk_size: env.start_chunk_size.max(1),
        reorg_window: env.reorg_window,
        poll_interval: Duration::from_secs(env.poll_interval_secs.max(1)),
        resume,
        run_once,
    })
}
